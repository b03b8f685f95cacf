//! Property reference expansion: `${name}` and `${name:-default}` inside
//! command arguments and import paths. `$$` produces a literal dollar sign.

use super::store::PropertyStore;

pub fn expand_props(src: &str, props: &PropertyStore) -> Result<String, String> {
    let mut out = String::with_capacity(src.len());
    let mut rest = src;

    while let Some(dollar) = rest.find('$') {
        out.push_str(&rest[..dollar]);
        rest = &rest[dollar + 1..];

        match rest.chars().next() {
            Some('$') => {
                out.push('$');
                rest = &rest[1..];
            }
            Some('{') => {
                let Some(close) = rest.find('}') else {
                    return Err(format!("Unterminated property reference in '{src}'"));
                };
                let reference = &rest[1..close];
                rest = &rest[close + 1..];

                let (name, default) = match reference.split_once(":-") {
                    Some((name, default)) => (name, Some(default)),
                    None => (reference, None),
                };
                if name.is_empty() {
                    return Err(format!("Empty property name in '{src}'"));
                }
                match props.get(name) {
                    Some(value) if !value.is_empty() => out.push_str(&value),
                    _ => match default {
                        Some(default) => out.push_str(default),
                        None => {
                            return Err(format!("Property '{name}' in '{src}' has no value"));
                        }
                    },
                }
            }
            _ => {
                return Err(format!("Lone '$' in '{src}', use '$$' for a literal"));
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Expand every argument past argv[0]. argv[0] is the executable path and is
/// deliberately never expanded.
pub fn expand_args(args: &[String], props: &PropertyStore) -> Result<Vec<String>, String> {
    let mut expanded = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        if i == 0 {
            expanded.push(arg.clone());
        } else {
            expanded.push(expand_props(arg, props)?);
        }
    }
    Ok(expanded)
}
