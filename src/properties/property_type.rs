//! Value validation against the type recorded in the property-info trie.
//!
//! Types are symbolic strings: `string`, `bool`, `int`, `uint`, `double`,
//! `size`, or `enum <value>...`. An unknown or missing type means `string`
//! (everything passes), matching the permissive default readers expect.

#[must_use]
pub fn check_type(type_str: &str, value: &str) -> bool {
    let mut fields = type_str.split_whitespace();
    match fields.next() {
        None | Some("string") => true,
        Some("bool") => matches!(value, "true" | "false" | "1" | "0"),
        Some("int") => value.parse::<i64>().is_ok(),
        Some("uint") => value.parse::<u64>().is_ok(),
        Some("double") => value.parse::<f64>().is_ok(),
        Some("size") => match value.strip_suffix(['g', 'k', 'm']) {
            Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
            None => false,
        },
        Some("enum") => fields.any(|allowed| allowed == value),
        Some(_) => true,
    }
}
