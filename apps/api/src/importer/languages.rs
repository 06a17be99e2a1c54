//! Canonical language naming for the language dictionary.
//!
//! CVs name languages in whatever language the CV is written in. The
//! dictionary stores one canonical English name per language, so lookups
//! normalize through this fixed map before touching the database.

/// Native / foreign spellings mapped to the canonical English name.
/// Matching is case-insensitive on the trimmed input.
const LANGUAGE_MAP: &[(&str, &str)] = &[
    ("english", "English"),
    ("inglés", "English"),
    ("ingles", "English"),
    ("anglais", "English"),
    ("englisch", "English"),
    ("inglese", "English"),
    ("spanish", "Spanish"),
    ("español", "Spanish"),
    ("espanol", "Spanish"),
    ("castellano", "Spanish"),
    ("french", "French"),
    ("français", "French"),
    ("francais", "French"),
    ("francés", "French"),
    ("german", "German"),
    ("deutsch", "German"),
    ("alemán", "German"),
    ("allemand", "German"),
    ("italian", "Italian"),
    ("italiano", "Italian"),
    ("portuguese", "Portuguese"),
    ("português", "Portuguese"),
    ("portugues", "Portuguese"),
    ("dutch", "Dutch"),
    ("nederlands", "Dutch"),
    ("polish", "Polish"),
    ("polski", "Polish"),
    ("russian", "Russian"),
    ("русский", "Russian"),
    ("ukrainian", "Ukrainian"),
    ("українська", "Ukrainian"),
    ("czech", "Czech"),
    ("čeština", "Czech"),
    ("cestina", "Czech"),
    ("slovak", "Slovak"),
    ("romanian", "Romanian"),
    ("română", "Romanian"),
    ("hungarian", "Hungarian"),
    ("magyar", "Hungarian"),
    ("greek", "Greek"),
    ("ελληνικά", "Greek"),
    ("bulgarian", "Bulgarian"),
    ("serbian", "Serbian"),
    ("croatian", "Croatian"),
    ("swedish", "Swedish"),
    ("svenska", "Swedish"),
    ("norwegian", "Norwegian"),
    ("norsk", "Norwegian"),
    ("danish", "Danish"),
    ("dansk", "Danish"),
    ("finnish", "Finnish"),
    ("suomi", "Finnish"),
    ("turkish", "Turkish"),
    ("türkçe", "Turkish"),
    ("turkce", "Turkish"),
    ("arabic", "Arabic"),
    ("العربية", "Arabic"),
    ("hebrew", "Hebrew"),
    ("hindi", "Hindi"),
    ("chinese", "Chinese"),
    ("mandarin", "Chinese"),
    ("中文", "Chinese"),
    ("japanese", "Japanese"),
    ("日本語", "Japanese"),
    ("korean", "Korean"),
    ("한국어", "Korean"),
    ("vietnamese", "Vietnamese"),
    ("thai", "Thai"),
    ("indonesian", "Indonesian"),
];

/// Normalizes a language name to its canonical English form.
/// Unknown names fall back to a title-cased copy of the input.
pub fn canonical_language(name: &str) -> String {
    let trimmed = name.trim();
    let lowered = trimmed.to_lowercase();
    for (alias, canonical) in LANGUAGE_MAP {
        if *alias == lowered {
            return (*canonical).to_string();
        }
    }
    title_case(trimmed)
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_names_normalize() {
        assert_eq!(canonical_language("Deutsch"), "German");
        assert_eq!(canonical_language("español"), "Spanish");
        assert_eq!(canonical_language("FRANÇAIS"), "French");
        assert_eq!(canonical_language("日本語"), "Japanese");
    }

    #[test]
    fn test_english_names_pass_through() {
        assert_eq!(canonical_language("english"), "English");
        assert_eq!(canonical_language("Polish"), "Polish");
    }

    #[test]
    fn test_unknown_names_are_title_cased() {
        assert_eq!(canonical_language("klingon"), "Klingon");
        assert_eq!(canonical_language("  esperanto "), "Esperanto");
    }
}
