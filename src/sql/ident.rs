/// Identifier and expression guards
///
/// Every identifier that reaches emitted SQL from outside the schema
/// passes through here first. Right-hand values always travel through
/// placeholders, so the guards only cover the left-hand/projection
/// positions.
use crate::error::{MsgSqlError, Result};

/// Words that must not appear as a standalone token inside a result
/// expression.
const FORBIDDEN_WORDS: &[&str] = &[
    "OR", "UNION", "SELECT", "DROP", "INSERT", "UPDATE", "DELETE", "PG_SLEEP",
];

/// Validate a list of plain identifiers.
///
/// Each element is either `*` or consists solely of ASCII letters,
/// digits, `_` and `.`, and must not be empty or start with a digit.
pub fn check_identifier<S: AsRef<str>>(names: &[S]) -> Result<()> {
    for name in names {
        let name = name.as_ref();
        if name == "*" {
            continue;
        }
        if name.is_empty() {
            return Err(MsgSqlError::Identifier("empty identifier".to_string()));
        }
        if name.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(MsgSqlError::Identifier(format!(
                "identifier '{name}' starts with a digit"
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(MsgSqlError::Identifier(format!(
                "identifier '{name}' contains invalid characters"
            )));
        }
    }
    Ok(())
}

/// Validate a result expression.
///
/// Permits identifier characters plus `()[],.*/+-:'` and whitespace,
/// requires balanced parentheses and brackets, rejects comment markers,
/// semicolons, and a set of statement keywords appearing as standalone
/// tokens. Single-quoted literals are opaque.
pub fn check_expression(expr: &str) -> Result<()> {
    let mut paren_depth = 0i32;
    let mut bracket_depth = 0i32;
    let mut in_quote = false;
    let mut prev = '\0';
    let mut token = String::new();

    for c in expr.chars() {
        if in_quote {
            if c == '\'' {
                in_quote = false;
            }
            prev = c;
            continue;
        }
        match c {
            '\'' => {
                check_token(expr, &mut token)?;
                in_quote = true;
            }
            '(' => {
                check_token(expr, &mut token)?;
                paren_depth += 1;
            }
            ')' => {
                check_token(expr, &mut token)?;
                paren_depth -= 1;
                if paren_depth < 0 {
                    return Err(unbalanced(expr));
                }
            }
            '[' => {
                check_token(expr, &mut token)?;
                bracket_depth += 1;
            }
            ']' => {
                check_token(expr, &mut token)?;
                bracket_depth -= 1;
                if bracket_depth < 0 {
                    return Err(unbalanced(expr));
                }
            }
            '-' => {
                check_token(expr, &mut token)?;
                if prev == '-' {
                    return Err(MsgSqlError::Identifier(format!(
                        "expression '{expr}' contains a comment marker"
                    )));
                }
            }
            '*' | '/' => {
                check_token(expr, &mut token)?;
                if (prev == '/' && c == '*') || (prev == '*' && c == '/') {
                    return Err(MsgSqlError::Identifier(format!(
                        "expression '{expr}' contains a comment marker"
                    )));
                }
            }
            ',' | '.' | '+' | ':' => check_token(expr, &mut token)?,
            c if c.is_whitespace() => check_token(expr, &mut token)?,
            c if c.is_ascii_alphanumeric() || c == '_' => token.push(c),
            _ => {
                return Err(MsgSqlError::Identifier(format!(
                    "expression '{expr}' contains invalid character '{c}'"
                )))
            }
        }
        prev = c;
    }

    if in_quote {
        return Err(MsgSqlError::Identifier(format!(
            "expression '{expr}' has an unterminated string literal"
        )));
    }
    if paren_depth != 0 || bracket_depth != 0 {
        return Err(unbalanced(expr));
    }
    check_token(expr, &mut token)
}

fn unbalanced(expr: &str) -> MsgSqlError {
    MsgSqlError::Identifier(format!("expression '{expr}' has unbalanced brackets"))
}

fn check_token(expr: &str, token: &mut String) -> Result<()> {
    if token.is_empty() {
        return Ok(());
    }
    let upper = token.to_ascii_uppercase();
    let hit = FORBIDDEN_WORDS.contains(&upper.as_str());
    token.clear();
    if hit {
        return Err(MsgSqlError::Identifier(format!(
            "expression '{expr}' contains a forbidden keyword"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_accepts_plain_names() {
        assert!(check_identifier(&["id", "user_name", "t.col", "*"]).is_ok());
    }

    #[test]
    fn test_identifier_rejects_bad_names() {
        assert!(check_identifier(&[""]).is_err());
        assert!(check_identifier(&["1col"]).is_err());
        assert!(check_identifier(&["a b"]).is_err());
        assert!(check_identifier(&["a;drop"]).is_err());
        assert!(check_identifier(&["a'"]).is_err());
    }

    #[test]
    fn test_expression_accepts_function_calls() {
        assert!(check_expression("count(*)").is_ok());
        assert!(check_expression("coalesce(a.b, 0) + 1").is_ok());
        assert!(check_expression("substr(name, 1, 3)").is_ok());
        assert!(check_expression("tags[1]").is_ok());
        assert!(check_expression("cast(x as_of:y)").is_ok());
    }

    #[test]
    fn test_expression_quoted_literal_is_opaque() {
        assert!(check_expression("concat(name, 'select or drop')").is_ok());
        assert!(check_expression("'unterminated").is_err());
    }

    #[test]
    fn test_expression_rejects_injection() {
        assert!(check_expression("1; drop table users").is_err());
        assert!(check_expression("a -- comment").is_err());
        assert!(check_expression("a /* x */ b").is_err());
        assert!(check_expression("x union all").is_err());
        assert!(check_expression("pg_sleep(10)").is_err());
        assert!(check_expression("PG_Sleep(10)").is_err());
        assert!(check_expression("a or b").is_err());
        assert!(check_expression("(a").is_err());
        assert!(check_expression("a)").is_err());
        assert!(check_expression("a[1").is_err());
    }
}
