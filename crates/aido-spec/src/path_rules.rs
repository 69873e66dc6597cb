//! Path rule engine
//!
//! Path rules are the declarative strings in a sandbox's `inputs` and
//! `outputs` lists. A rule is one of:
//!
//! - `**`, which matches every path
//! - a directory rule ending in `/`, which matches the directory and anything beneath it
//! - a glob containing any of `*?[]{}`
//! - a literal relative path, compared exactly after normalization
//!
//! Every function here is pure. Malformed input yields `false` or an empty
//! string, never a panic.

use regex::Regex;

/// Characters that mark a rule as a glob
const GLOB_CHARS: &[char] = &['*', '?', '[', ']', '{', '}'];

/// Characters that end the literal prefix of a glob when computing a search base
const WILDCARD_CHARS: &[char] = &['*', '?', '[', '{'];

/// Rule that matches every path
pub const MATCH_ALL: &str = "**";

const OUTPUTS_DIR: &str = "outputs";

/// Convert a configured path to a forward-slash relative form.
///
/// Trims surrounding whitespace, turns backslashes into `/`, collapses runs of
/// `/`, and strips any leading `./` segments.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let mut out = String::with_capacity(trimmed.len());
    let mut prev_slash = false;
    for ch in trimmed.chars() {
        let ch = if ch == '\\' { '/' } else { ch };
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(ch);
    }

    let mut rest = out.as_str();
    while let Some(stripped) = rest.strip_prefix("./") {
        rest = stripped;
    }
    rest.to_string()
}

/// Returns true if `path` is a relative path that cannot escape its root.
///
/// Rejects empty paths, `.`, absolute paths, drive-letter paths, and any
/// `.`, `..`, or empty segment. A single trailing `/` is allowed so directory
/// rules such as `outputs/` pass.
pub fn is_safe(path: &str) -> bool {
    let normalized = normalize(path);
    if normalized.is_empty() || normalized == "." {
        return false;
    }
    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return false;
    }

    let segments: Vec<&str> = normalized.split('/').collect();
    let last = segments.len() - 1;
    segments.iter().enumerate().all(|(index, segment)| match *segment {
        "" => index == last,
        "." | ".." => false,
        _ => true,
    })
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'/'
}

/// Returns true if `path` contains glob metacharacters
pub fn is_glob(path: &str) -> bool {
    path.contains(GLOB_CHARS)
}

/// Rewrite an output rule relative to the outputs directory.
///
/// `outputs` and `outputs/` become [`MATCH_ALL`]; `outputs/x` becomes `x`.
/// Anything else is returned normalized.
pub fn normalize_output_rule(rule: &str) -> String {
    let normalized = normalize(rule);
    if normalized == OUTPUTS_DIR || normalized == "outputs/" {
        return MATCH_ALL.to_string();
    }
    match normalized.strip_prefix("outputs/") {
        Some(rest) => rest.to_string(),
        None => normalized,
    }
}

/// Test a relative path against a single output rule.
pub fn matches(path: &str, rule: &str) -> bool {
    let path = normalize(path);
    let path = path.trim_end_matches('/');
    let rule = normalize_output_rule(rule);

    if path.is_empty() || rule.is_empty() {
        return false;
    }
    if rule == MATCH_ALL {
        return true;
    }

    if let Some(dir) = rule.strip_suffix('/') {
        return path == dir || path.strip_prefix(dir).is_some_and(|r| r.starts_with('/'));
    }

    if is_glob(&rule) {
        return GlobMatcher::new(&rule).is_some_and(|m| m.is_match(path));
    }

    path == rule
}

/// Allowlist check: true if any rule matches `path`.
pub fn is_path_allowed<S: AsRef<str>>(path: &str, rules: &[S]) -> bool {
    rules.iter().any(|rule| matches(path, rule.as_ref()))
}

/// Directory to start walking from when resolving `pattern`.
///
/// This is the literal prefix before the first wildcard, cut back to the last
/// complete directory. Returns `.` when the wildcard is in the first segment,
/// and the normalized pattern itself when it has no wildcard.
pub fn search_base(pattern: &str) -> String {
    let normalized = normalize(pattern);
    let Some(first) = normalized.find(WILDCARD_CHARS) else {
        return normalized;
    };
    if first == 0 {
        return ".".to_string();
    }

    match normalized[..first].rfind('/') {
        Some(0) | None => ".".to_string(),
        Some(slash) => normalized[..slash].to_string(),
    }
}

/// A compiled glob, anchored at both ends.
///
/// - `*` matches any run of characters except `/`
/// - `**/` matches zero or more whole segments
/// - `**` anywhere else matches across segments
/// - `?` matches exactly one character other than `/`
///
/// Every other character, brackets and braces included, is literal.
#[derive(Debug, Clone)]
pub struct GlobMatcher {
    pattern: String,
    regex: Regex,
}

impl GlobMatcher {
    /// Compile `pattern`. Returns `None` only if the generated expression is
    /// rejected by the regex engine, which callers treat as "no match".
    pub fn new(pattern: &str) -> Option<Self> {
        let pattern = normalize(pattern);
        let regex = Regex::new(&glob_to_regex(&pattern)).ok()?;
        Some(Self { pattern, regex })
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut regex = String::with_capacity(pattern.len() * 2 + 2);
    regex.push('^');

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    regex.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    regex.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                regex.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                regex.push_str("[^/]");
                i += 1;
            }
            c => {
                let mut buf = [0u8; 4];
                regex.push_str(&regex::escape(c.encode_utf8(&mut buf)));
                i += 1;
            }
        }
    }

    regex.push('$');
    regex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("./data//input.json"), "data/input.json");
        assert_eq!(normalize("././a"), "a");
        assert_eq!(normalize("a\\b\\c"), "a/b/c");
        assert_eq!(normalize("  outputs/  "), "outputs/");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_is_safe_accepts_relative_paths() {
        for path in ["data/input.json", "logs/**/*.log", "outputs/", "./notes.md", "a//b"] {
            assert!(is_safe(path), "expected '{path}' to be safe");
        }
    }

    #[test]
    fn test_is_safe_rejects_unsafe_paths() {
        for path in [
            "../secrets.env",
            "/etc/passwd",
            "C:\\Windows",
            "C:\\Windows\\System32",
            "c:/temp",
            "",
            ".",
            "./",
            "data/../../etc",
            "data/./x",
            "..",
            "a/..",
            "\\\\server\\share",
        ] {
            assert!(!is_safe(path), "expected '{path}' to be unsafe");
        }
    }

    #[test]
    fn test_glob_matcher() {
        let m = GlobMatcher::new("data/**/*.json").unwrap();
        assert!(m.is_match("data/item.json"));
        assert!(m.is_match("data/nested/item.json"));
        assert!(m.is_match("data/a/b/c/item.json"));
        assert!(!m.is_match("data/item.txt"));
        assert!(!m.is_match("other/item.json"));
    }

    #[test]
    fn test_glob_root_double_star() {
        let m = GlobMatcher::new("**/*.json").unwrap();
        assert!(m.is_match("a.json"));
        assert!(m.is_match("x/y/a.json"));
        assert!(!m.is_match("a.jsonl"));
    }

    #[test]
    fn test_glob_single_star_and_question() {
        let star = GlobMatcher::new("*.md").unwrap();
        assert!(star.is_match("README.md"));
        assert!(!star.is_match("docs/README.md"));

        let q = GlobMatcher::new("file?.txt").unwrap();
        assert!(q.is_match("file1.txt"));
        assert!(!q.is_match("file12.txt"));
        assert!(!q.is_match("file/.txt"));
    }

    #[test]
    fn test_glob_escapes_regex_metacharacters() {
        let m = GlobMatcher::new("a.b+(c)*").unwrap();
        assert!(m.is_match("a.b+(c)xyz"));
        assert!(!m.is_match("aXb+(c)"));

        let brackets = GlobMatcher::new("[ab].txt").unwrap();
        assert!(brackets.is_match("[ab].txt"));
        assert!(!brackets.is_match("a.txt"));
    }

    #[test]
    fn test_glob_is_anchored() {
        let m = GlobMatcher::new("*.log").unwrap();
        assert!(!m.is_match("app.log.bak"));
        assert!(!m.is_match("x/app.log"));
    }

    #[test]
    fn test_normalize_output_rule() {
        assert_eq!(normalize_output_rule("outputs/"), "**");
        assert_eq!(normalize_output_rule("outputs"), "**");
        assert_eq!(normalize_output_rule("./outputs/"), "**");
        assert_eq!(normalize_output_rule("outputs/report.md"), "report.md");
        assert_eq!(normalize_output_rule("outputs/reports/"), "reports/");
        assert_eq!(normalize_output_rule("reports/"), "reports/");
    }

    #[test]
    fn test_matches_rule_shapes() {
        assert!(matches("anything/at/all.bin", "**"));
        assert!(matches("reports/summary.md", "reports/"));
        assert!(matches("reports", "reports/"));
        assert!(!matches("reportsx/summary.md", "reports/"));
        assert!(matches("report.md", "report.md"));
        assert!(matches("report.md", "outputs/report.md"));
        assert!(!matches("report.md.bak", "report.md"));
        assert!(matches("artifacts/a.csv", "artifacts/*.csv"));
        assert!(!matches("artifacts/deep/a.csv", "artifacts/*.csv"));
        assert!(matches("whatever.txt", "outputs/"));
    }

    #[test]
    fn test_matches_rejects_empty_inputs() {
        assert!(!matches("", "**"));
        assert!(!matches("a.txt", ""));
    }

    #[test]
    fn test_is_path_allowed() {
        let rules = ["reports/", "summary.json"];
        assert!(is_path_allowed("reports/jan.md", &rules));
        assert!(is_path_allowed("summary.json", &rules));
        assert!(!is_path_allowed("tmp/debug.log", &rules));

        let none: [&str; 0] = [];
        assert!(!is_path_allowed("summary.json", &none));
    }

    #[test]
    fn test_search_base() {
        assert_eq!(search_base("data/**/*.json"), "data");
        assert_eq!(search_base("*.md"), ".");
        assert_eq!(search_base("src/lib/*.rs"), "src/lib");
        assert_eq!(search_base("docs*/x.md"), ".");
        assert_eq!(search_base("a/b?/c"), "a");
        assert_eq!(search_base("plain/file.txt"), "plain/file.txt");
    }

    #[test]
    fn test_is_glob() {
        assert!(is_glob("*.rs"));
        assert!(is_glob("a/{b,c}"));
        assert!(is_glob("file?.txt"));
        assert!(!is_glob("plain/file.txt"));
    }
}
