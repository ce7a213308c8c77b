//! Shell-style matching of qualified Go function names
//!
//! `*` matches any run of characters (including `/` and `.`), `?` exactly
//! one character, and `[...]` a character class with ranges and `!`/`^`
//! negation. A pattern without any of these is compared for equality.

const GLOB_CHARS: [char; 3] = ['*', '?', '['];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildcardPattern {
    pattern: String,
    glob: bool,
}

impl WildcardPattern {
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        Self { pattern: pattern.to_string(), glob: pattern.contains(GLOB_CHARS) }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// True when the pattern can match more than one name
    #[must_use]
    pub fn is_glob(&self) -> bool {
        self.glob
    }

    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        if !self.glob {
            return self.pattern == name;
        }
        let pattern: Vec<char> = self.pattern.chars().collect();
        let text: Vec<char> = name.chars().collect();
        glob_match(&pattern, &text)
    }
}

/// Iterative glob match, backtracking only to the most recent `*`
fn glob_match(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        let step = match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
                continue;
            }
            Some('?') => Some(1),
            Some('[') => match_class(&pattern[p..], text[t]),
            Some(&c) if c == text[t] => Some(1),
            _ => None,
        };

        match (step, star) {
            (Some(width), _) => {
                p += width;
                t += 1;
            }
            (None, Some((star_p, star_t))) => {
                // let the last star swallow one more character
                p = star_p + 1;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            }
            (None, None) => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Match `c` against the class at the start of `pattern`.
///
/// Returns the class width in pattern characters when it matches. An
/// unterminated `[` is treated as a literal.
fn match_class(pattern: &[char], c: char) -> Option<usize> {
    let Some(close) = pattern.iter().skip(2).position(|&ch| ch == ']').map(|pos| pos + 2) else {
        return (c == '[').then_some(1);
    };

    let mut body = &pattern[1..close];
    let negated = matches!(body.first(), Some('!' | '^'));
    if negated {
        body = &body[1..];
    }

    let mut found = false;
    let mut i = 0;
    while i < body.len() {
        if i + 2 < body.len() && body[i + 1] == '-' {
            found |= (body[i]..=body[i + 2]).contains(&c);
            i += 3;
        } else {
            found |= body[i] == c;
            i += 1;
        }
    }

    (found != negated).then_some(close + 1)
}
