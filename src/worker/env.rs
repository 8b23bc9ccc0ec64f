//! Environment variable expansion for worker configuration
//!
//! Plans carry credential placeholders like `$SECRET_KEY` or `${SECRET_KEY}`
//! so the actual values can be injected into the worker pod as environment
//! variables. Unset variables expand to the empty string.

/// Expand `$NAME` and `${NAME}` references against the process environment
pub fn expand(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some((_, '{')) => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if closed {
                    out.push_str(&lookup(&name));
                } else {
                    // Unterminated brace, keep the text as written
                    out.push_str("${");
                    out.push_str(&name);
                }
            }
            Some((_, c)) if c.is_ascii_alphabetic() || *c == '_' => {
                let mut name = String::new();
                while let Some((_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        name.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&lookup(&name));
            }
            _ => out.push('$'),
        }
    }
    out
}

fn lookup(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }
    std::env::var(name).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_untouched() {
        assert_eq!(expand("no references here"), "no references here");
    }

    #[test]
    fn both_reference_forms_expand() {
        std::env::set_var("WORKER_ENV_TEST_A", "topsecret");
        assert_eq!(expand("key=$WORKER_ENV_TEST_A"), "key=topsecret");
        assert_eq!(expand("key=${WORKER_ENV_TEST_A}!"), "key=topsecret!");
    }

    #[test]
    fn unset_variables_expand_to_empty() {
        std::env::remove_var("WORKER_ENV_TEST_MISSING");
        assert_eq!(expand("x${WORKER_ENV_TEST_MISSING}y"), "xy");
        assert_eq!(expand("x$WORKER_ENV_TEST_MISSING"), "x");
    }

    #[test]
    fn lone_dollar_signs_survive() {
        assert_eq!(expand("cost: 5$"), "cost: 5$");
        assert_eq!(expand("a$ b"), "a$ b");
        assert_eq!(expand("$$"), "$$");
    }

    #[test]
    fn unterminated_brace_is_kept_verbatim() {
        assert_eq!(expand("x${OOPS"), "x${OOPS");
    }
}
