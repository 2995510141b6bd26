use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;

//------------------------------------------

/// Looks at directory entry names for things that may confuse users.
/// Returns one message per problem found.
pub trait NameChecker: Send + Sync {
    fn check(&self, name: &OsStr) -> Vec<String>;
}

pub struct DefaultNameChecker;

impl NameChecker for DefaultNameChecker {
    fn check(&self, name: &OsStr) -> Vec<String> {
        let mut problems = Vec::new();

        let s = match std::str::from_utf8(name.as_bytes()) {
            Ok(s) => s,
            Err(_) => {
                problems.push("Name is not valid UTF-8.".to_string());
                return problems;
            }
        };

        if s.chars().any(|c| c.is_control()) {
            problems.push("Name contains control characters.".to_string());
        }

        if s.starts_with(char::is_whitespace) || s.ends_with(char::is_whitespace) {
            problems.push("Name has leading or trailing whitespace.".to_string());
        }

        problems
    }
}

fn push_escaped(out: &mut String, s: &str) {
    for c in s.chars() {
        if c.is_control() {
            out.push_str(&format!("\\x{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
}

/// Render a name so that it can be printed safely.
pub fn escape_name(name: &OsStr) -> String {
    let mut out = String::new();
    let mut bytes = name.as_bytes();

    loop {
        match std::str::from_utf8(bytes) {
            Ok(s) => {
                push_escaped(&mut out, s);
                break;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                push_escaped(&mut out, std::str::from_utf8(valid).unwrap_or_default());
                let nr_bad = e.error_len().unwrap_or(rest.len());
                for b in &rest[..nr_bad] {
                    out.push_str(&format!("\\x{:02X}", b));
                }
                bytes = &rest[nr_bad..];
            }
        }
    }

    out
}

//------------------------------------------


//------------------------------------------
