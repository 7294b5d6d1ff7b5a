//! URL slugs for map names

const MAX_LENGTH: usize = 50;
const FALLBACK: &str = "map";

fn fold(c: char) -> Option<&'static str> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'æ' => "ae",
        'ç' | 'ć' | 'č' => "c",
        'ď' | 'đ' => "d",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ę' | 'ě' => "e",
        'ğ' => "g",
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'ı' => "i",
        'ł' | 'ľ' => "l",
        'ñ' | 'ń' | 'ň' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => "o",
        'œ' => "oe",
        'ř' => "r",
        'ś' | 'š' | 'ş' => "s",
        'ß' => "ss",
        'ť' | 'ţ' => "t",
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => "u",
        'ý' | 'ÿ' => "y",
        'ź' | 'ż' | 'ž' => "z",
        _ => return None,
    };
    Some(folded)
}

/// Lowercase ASCII slug: accents folded, runs of anything else collapsed
/// to a single dash. Never empty.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars().flat_map(char::to_lowercase) {
        let piece = if c.is_ascii_alphanumeric() || c == '_' {
            let mut buf = [0u8; 4];
            Some(c.encode_utf8(&mut buf).to_string())
        } else {
            fold(c).map(str::to_string)
        };
        match piece {
            Some(piece) => {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push_str(&piece);
            }
            None => pending_dash = true,
        }
    }
    if slug.len() > MAX_LENGTH {
        slug.truncate(MAX_LENGTH);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    if slug.is_empty() {
        return FALLBACK.to_string();
    }
    slug
}

/// Cut `value` to at most `max` characters, keeping char boundaries.
pub fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("test map"), "test-map");
        assert_eq!(slugify("  Hello,   World!  "), "hello-world");
        assert_eq!(slugify("Café de la Gare"), "cafe-de-la-gare");
        assert_eq!(slugify("Straße"), "strasse");
        assert_eq!(slugify("snake_case"), "snake_case");
    }

    #[test]
    fn test_slugify_fallback() {
        assert_eq!(slugify(""), "map");
        assert_eq!(slugify("!!!"), "map");
        assert_eq!(slugify("東京"), "map");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("ééé", 2), "éé");
    }

    #[test]
    fn test_slugify_truncates() {
        let slug = slugify(&"a ".repeat(60));
        assert!(slug.len() <= MAX_LENGTH);
        assert!(!slug.ends_with('-'));
    }
}
