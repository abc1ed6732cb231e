use crate::core::{UserDefine, UserDefineType};
use crate::error::DefineError;

/// Renders the enabled defines as build flags, one per line, in input order.
///
/// ```text
/// Boolean -> -DKEY
/// Number  -> -DKEY=value
/// Text    -> -DKEY="value"
/// Enum    -> -DKEY=value   (value must be one of enum_values)
/// ```
pub fn materialize(defines: &[UserDefine]) -> Result<String, DefineError> {
    let lines = defines
        .iter()
        .filter(|define| define.enabled)
        .map(render_define)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}

/// Keys of the defines that will end up in the materialized text.
pub fn enabled_keys(defines: &[UserDefine]) -> Vec<String> {
    defines
        .iter()
        .filter(|define| define.enabled)
        .map(|define| define.key.clone())
        .collect()
}

/// Extracts define keys from user-defines text (`-DKEY`, `-DKEY=value`,
/// optionally commented out with `#`).
pub fn parse_define_keys(text: &str) -> Vec<String> {
    let mut keys = Vec::new();
    for line in text.lines() {
        let line = line.trim().trim_start_matches('#').trim_start();
        let Some(rest) = line.strip_prefix("-D") else {
            continue;
        };
        let key: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

fn render_define(define: &UserDefine) -> Result<String, DefineError> {
    let key = define.key.trim();
    if !is_valid_key(key) {
        return Err(DefineError::InvalidKey(define.key.clone()));
    }

    let line = match define.define_type {
        UserDefineType::Boolean => format!("-D{}", key),
        UserDefineType::Number => {
            let value = define.value.trim();
            if !is_decimal_literal(value) {
                return Err(DefineError::InvalidNumber {
                    key: key.to_string(),
                    value: define.value.clone(),
                });
            }
            format!("-D{}={}", key, value)
        }
        UserDefineType::Text => {
            // A line break would start a second, unchecked define.
            if define.value.chars().any(char::is_control) {
                return Err(DefineError::InvalidText {
                    key: key.to_string(),
                });
            }
            format!("-D{}=\"{}\"", key, escape_text(&define.value))
        }
        UserDefineType::Enum => {
            if define.value.chars().any(char::is_control) {
                return Err(DefineError::InvalidText {
                    key: key.to_string(),
                });
            }
            let allowed = define.enum_values.clone().unwrap_or_default();
            if !allowed.iter().any(|option| option == &define.value) {
                return Err(DefineError::InvalidEnumValue {
                    key: key.to_string(),
                    value: define.value.clone(),
                    allowed,
                });
            }
            format!("-D{}={}", key, define.value)
        }
    };
    Ok(line)
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Plain decimal: optional sign, digits, at most one dot. No exponents,
/// `inf` or `NaN`, which are not valid C literals here.
fn is_decimal_literal(value: &str) -> bool {
    let digits = value.strip_prefix(['-', '+']).unwrap_or(value);
    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (digits, None),
    };
    let all_digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    match fraction {
        Some(fraction) => {
            !(whole.is_empty() && fraction.is_empty()) && all_digits(whole) && all_digits(fraction)
        }
        None => !whole.is_empty() && all_digits(whole),
    }
}

fn escape_text(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<UserDefine> {
        let mut domain = UserDefine::with_value("REGULATORY_DOMAIN", "FCC_915", UserDefineType::Enum);
        domain.enum_values = Some(vec!["FCC_915".to_string(), "EU_868".to_string()]);
        vec![
            UserDefine::with_value("MY_BINDING_PHRASE", "say \"hi\"", UserDefineType::Text),
            domain,
            UserDefine::boolean("LOCK_ON_FIRST_CONNECTION", true),
            UserDefine::with_value("TLM_REPORT_INTERVAL_MS", "320", UserDefineType::Number),
        ]
    }

    #[test]
    fn renders_each_type() {
        let text = materialize(&sample()).unwrap();
        assert_eq!(
            text,
            "-DMY_BINDING_PHRASE=\"say \\\"hi\\\"\"\n\
             -DREGULATORY_DOMAIN=FCC_915\n\
             -DLOCK_ON_FIRST_CONNECTION\n\
             -DTLM_REPORT_INTERVAL_MS=320"
        );
    }

    #[test]
    fn materializing_twice_is_identical() {
        let defines = sample();
        assert_eq!(materialize(&defines).unwrap(), materialize(&defines).unwrap());
    }

    #[test]
    fn disabling_removes_exactly_one_line() {
        let mut defines = sample();
        let before = materialize(&defines).unwrap();
        defines[2].enabled = false;
        let after = materialize(&defines).unwrap();

        let expected: Vec<&str> = before
            .lines()
            .filter(|line| *line != "-DLOCK_ON_FIRST_CONNECTION")
            .collect();
        assert_eq!(after.lines().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn enum_value_outside_options_is_rejected() {
        let mut defines = sample();
        defines[1].value = "AU_433".to_string();
        assert!(matches!(
            materialize(&defines),
            Err(DefineError::InvalidEnumValue { .. })
        ));
    }

    #[test]
    fn non_numeric_number_is_rejected() {
        let defines = vec![UserDefine::with_value("RATE", "fast", UserDefineType::Number)];
        assert_eq!(
            materialize(&defines),
            Err(DefineError::InvalidNumber {
                key: "RATE".to_string(),
                value: "fast".to_string(),
            })
        );
    }

    #[test]
    fn float_specials_and_exponents_are_not_numbers() {
        for value in ["inf", "NaN", "1e5", "-", ".", "1.2.3", "0x10"] {
            let defines = vec![UserDefine::with_value("RATE", value, UserDefineType::Number)];
            assert!(
                matches!(materialize(&defines), Err(DefineError::InvalidNumber { .. })),
                "{} should be rejected",
                value
            );
        }
    }

    #[test]
    fn signed_and_fractional_numbers_render() {
        let defines = vec![
            UserDefine::with_value("OFFSET", "-12", UserDefineType::Number),
            UserDefine::with_value("GAIN", "0.75", UserDefineType::Number),
        ];
        assert_eq!(materialize(&defines).unwrap(), "-DOFFSET=-12\n-DGAIN=0.75");
    }

    #[test]
    fn multi_line_text_cannot_smuggle_a_define() {
        let defines = vec![UserDefine::with_value(
            "MY_BINDING_PHRASE",
            "x\n-DUNLOCK_HIGHER_POWER",
            UserDefineType::Text,
        )];
        assert_eq!(
            materialize(&defines),
            Err(DefineError::InvalidText {
                key: "MY_BINDING_PHRASE".to_string(),
            })
        );

        let carriage = vec![UserDefine::with_value("PHRASE", "a\rb", UserDefineType::Text)];
        assert!(materialize(&carriage).is_err());
    }

    #[test]
    fn each_enabled_define_is_one_line() {
        let defines = sample();
        let text = materialize(&defines).unwrap();
        assert_eq!(text.lines().count(), enabled_keys(&defines).len());
        assert_eq!(parse_define_keys(&text), enabled_keys(&defines));
    }

    #[test]
    fn no_enabled_defines_gives_empty_text() {
        let defines = vec![UserDefine::boolean("UNUSED", false)];
        assert_eq!(materialize(&defines).unwrap(), "");
        assert!(enabled_keys(&defines).is_empty());
    }

    #[test]
    fn parses_keys_from_defines_file() {
        let text = "# comment line\n-DMY_BINDING_PHRASE=\"x\"\n#-DUNLOCK_HIGHER_POWER\n\n-DRATE=4";
        assert_eq!(
            parse_define_keys(text),
            vec!["MY_BINDING_PHRASE", "UNLOCK_HIGHER_POWER", "RATE"]
        );
    }
}
