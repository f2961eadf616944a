//! Application bundle metadata, read from the bundle's `Contents/Info.plist`
//! (XML or binary) and, for the display name, the localized
//! `Contents/Resources/<lang>.lproj/InfoPlist.strings`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use plist::{Dictionary, Value};

const INFO_PLIST: [&str; 2] = ["Contents", "Info.plist"];
const RESOURCES: [&str; 2] = ["Contents", "Resources"];
const LOCALIZED_STRINGS: &str = "InfoPlist.strings";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BundleInfo {
    pub identifier: Option<String>,
    pub name: Option<String>,
    pub version: Option<String>,
    pub icon: Option<PathBuf>,
    /// `LSUIElement` or `LSBackgroundOnly`: runs without a dock presence.
    pub background: bool,
}

impl BundleInfo {
    /// Identifier and display name, when both are present.
    pub fn identity(&self) -> Option<(&str, &str)> {
        Some((self.identifier.as_deref()?, self.name.as_deref()?))
    }
}

pub fn info_plist_path(bundle: &Path) -> PathBuf {
    INFO_PLIST.iter().fold(bundle.to_path_buf(), |p, c| p.join(c))
}

fn resources_dir(bundle: &Path) -> PathBuf {
    RESOURCES.iter().fold(bundle.to_path_buf(), |p, c| p.join(c))
}

/// Read identifier, name, version and icon for the bundle at `bundle`.
/// Returns `None` when the plist is missing, unreadable, or not a dictionary.
pub fn read_bundle(bundle: &Path) -> Option<BundleInfo> {
    let path = info_plist_path(bundle);
    let value = match Value::from_file(&path) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!(path = %path.display(), %err, "cannot parse Info.plist");
            return None;
        }
    };
    let mut info = parse_info_plist(bundle, value.as_dictionary()?);
    if let Some(localized) = localized_name(bundle, &preferred_languages()) {
        info.name = Some(localized);
    }
    Some(info)
}

pub fn parse_info_plist(bundle: &Path, dict: &Dictionary) -> BundleInfo {
    let icon = plist_string(dict, "CFBundleIconFile").map(|file| {
        let mut path = resources_dir(bundle);
        path.push(&file);
        if path.extension().is_none() {
            path.set_extension("icns");
        }
        path
    });

    BundleInfo {
        identifier: plist_string(dict, "CFBundleIdentifier"),
        name: display_name(dict),
        version: plist_string(dict, "CFBundleShortVersionString"),
        icon,
        background: plist_flag(dict, "LSUIElement") || plist_flag(dict, "LSBackgroundOnly"),
    }
}

fn display_name(dict: &Dictionary) -> Option<String> {
    plist_string(dict, "CFBundleDisplayName").or_else(|| plist_string(dict, "CFBundleName"))
}

/// Non-empty, trimmed string value of `key`.
pub fn plist_string(dict: &Dictionary, key: &str) -> Option<String> {
    let value = dict.get(key)?.as_string()?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Boolean-ish value of `key`. Info.plist files in the wild use `<true/>`,
/// `<string>1</string>` and `<integer>1</integer>` interchangeably.
pub fn plist_flag(dict: &Dictionary, key: &str) -> bool {
    match dict.get(key) {
        Some(Value::Boolean(flag)) => *flag,
        Some(Value::String(s)) => matches!(s.trim(), "1" | "YES" | "yes" | "true"),
        Some(Value::Integer(n)) => n.as_signed().is_some_and(|n| n != 0),
        _ => false,
    }
}

/// Languages to try for localized resources, most preferred first.
pub fn preferred_languages() -> Vec<String> {
    let mut langs = Vec::new();
    for var in ["LC_ALL", "LC_MESSAGES", "LANG"] {
        let Ok(raw) = std::env::var(var) else {
            continue;
        };
        let locale = raw.split(['.', '@']).next().unwrap_or_default();
        if locale.is_empty() || locale == "C" || locale == "POSIX" {
            continue;
        }
        langs.push(locale.to_string());
        if let Some((lang, _)) = locale.split_once('_') {
            langs.push(lang.to_string());
        }
        break;
    }
    langs.extend(["en", "English", "Base"].map(String::from));
    let mut seen = std::collections::HashSet::new();
    langs.retain(|l| seen.insert(l.clone()));
    langs
}

/// Display name from the first `<lang>.lproj/InfoPlist.strings` that has one.
pub fn localized_name(bundle: &Path, languages: &[String]) -> Option<String> {
    let resources = resources_dir(bundle);
    languages.iter().find_map(|lang| {
        let path = resources
            .join(format!("{lang}.lproj"))
            .join(LOCALIZED_STRINGS);
        let strings = read_strings(&path)?;
        ["CFBundleDisplayName", "CFBundleName"]
            .iter()
            .find_map(|key| strings.get(*key))
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    })
}

/// A `.strings` table, either compiled (binary or XML plist) or in the
/// `"key" = "value";` source form, UTF-8 or UTF-16 with a BOM.
fn read_strings(path: &Path) -> Option<HashMap<String, String>> {
    if let Ok(value) = Value::from_file(path)
        && let Some(dict) = value.as_dictionary()
    {
        return Some(
            dict.iter()
                .filter_map(|(k, v)| Some((k.clone(), v.as_string()?.to_string())))
                .collect(),
        );
    }
    let bytes = fs::read(path).ok()?;
    Some(parse_strings(&decode_text(&bytes)))
}

fn decode_text(bytes: &[u8]) -> String {
    match bytes {
        [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
        [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
        [0xEF, 0xBB, 0xBF, rest @ ..] => String::from_utf8_lossy(rest).into_owned(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Parse `"key" = "value";` pairs, skipping `/* */` and `//` comments.
/// Malformed entries are skipped up to the next `;`.
pub fn parse_strings(text: &str) -> HashMap<String, String> {
    let mut lexer = StringsLexer {
        chars: text.chars().collect(),
        pos: 0,
    };
    let mut table = HashMap::new();
    loop {
        lexer.skip_trivia();
        let Some(key) = lexer.token() else {
            break;
        };
        lexer.skip_trivia();
        if !lexer.eat('=') {
            lexer.skip_past(';');
            continue;
        }
        lexer.skip_trivia();
        let Some(value) = lexer.token() else {
            break;
        };
        lexer.skip_trivia();
        lexer.eat(';');
        table.insert(key, value);
    }
    table
}

struct StringsLexer {
    chars: Vec<char>,
    pos: usize,
}

impl StringsLexer {
    fn peek(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek(0) == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_past(&mut self, c: char) {
        while let Some(next) = self.peek(0) {
            self.pos += 1;
            if next == c {
                break;
            }
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some(c), _) if c.is_whitespace() || c == '{' || c == '}' => self.pos += 1,
                (Some('/'), Some('*')) => {
                    self.pos += 2;
                    while self.pos < self.chars.len()
                        && !(self.peek(0) == Some('*') && self.peek(1) == Some('/'))
                    {
                        self.pos += 1;
                    }
                    self.pos = (self.pos + 2).min(self.chars.len());
                }
                (Some('/'), Some('/')) => self.skip_past('\n'),
                _ => return,
            }
        }
    }

    fn token(&mut self) -> Option<String> {
        if self.eat('"') {
            let mut out = String::new();
            while let Some(c) = self.peek(0) {
                self.pos += 1;
                match c {
                    '"' => return Some(out),
                    '\\' => {
                        let escaped = self.peek(0)?;
                        self.pos += 1;
                        out.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => other,
                        });
                    }
                    other => out.push(other),
                }
            }
            return None;
        }

        let start = self.pos;
        while self
            .peek(0)
            .is_some_and(|c| c.is_alphanumeric() || "._-$:/".contains(c))
        {
            self.pos += 1;
        }
        (self.pos > start).then(|| self.chars[start..self.pos].iter().collect())
    }
}

/// Nearest ancestor of `path` (itself included) carrying `extension`.
pub fn enclosing_bundle(path: &Path, extension: &str) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(extension))
        })
        .map(Path::to_path_buf)
}

/// Metadata of the bundle enclosing an executable, when it has an identifier.
pub fn bundle_for_executable(exe: &Path, extension: &str) -> Option<BundleInfo> {
    let bundle = enclosing_bundle(exe, extension)?;
    read_bundle(&bundle).filter(|info| info.identifier.is_some())
}
