use std::collections::HashMap;

/// Parameter overrides pulled out of a prompt. Keys are stored lower-cased.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideSet {
    values: HashMap<String, String>,
}

impl OverrideSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_lowercase(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(&key.to_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPrompt {
    pub prompt: String,
    pub overrides: OverrideSet,
    pub override_lines: Vec<String>,
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|ch| ch.is_alphanumeric() || ch == '_')
}

/// Splits `identifier: value` into its parts. Returns `None` for lines that
/// should stay in the prompt.
fn split_override_line(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim_start();
    let (key, rest) = trimmed.split_once(':')?;
    if !is_identifier(key) {
        return None;
    }
    let value = rest.trim();
    // `https://...` on its own line is content, not a key named `https`.
    if value.is_empty() || value.starts_with("//") {
        return None;
    }
    Some((key, value))
}

pub fn parse_prompt_overrides(prompt: &str) -> ParsedPrompt {
    let mut overrides = OverrideSet::new();
    let mut override_lines = Vec::new();
    let mut kept = Vec::new();

    for (index, line) in prompt.lines().enumerate() {
        if index == 0 {
            kept.push(line);
            continue;
        }
        match split_override_line(line) {
            Some((key, value)) => {
                overrides.insert(key, value);
                override_lines.push(line.to_string());
            }
            None => kept.push(line),
        }
    }

    let cleaned = if override_lines.is_empty() {
        prompt.trim().to_string()
    } else {
        kept.join("\n").trim().to_string()
    };

    ParsedPrompt {
        prompt: cleaned,
        overrides,
        override_lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_overrides_and_cleans_prompt() {
        let parsed = parse_prompt_overrides(
            "A cat\n\nwidth: 1024\nheight: 768\nsteps: 60\nstyle_preset: Digital Art",
        );
        assert_eq!(parsed.prompt, "A cat");
        assert_eq!(parsed.overrides.len(), 4);
        assert_eq!(parsed.overrides.get("width"), Some("1024"));
        assert_eq!(parsed.overrides.get("height"), Some("768"));
        assert_eq!(parsed.overrides.get("steps"), Some("60"));
        assert_eq!(parsed.overrides.get("style_preset"), Some("Digital Art"));
    }

    #[test]
    fn keys_are_case_insensitive_and_last_one_wins() {
        let parsed = parse_prompt_overrides("A dog\nWidth: 100\nwidth: 200");
        assert_eq!(parsed.overrides.get("width"), Some("200"));
        assert_eq!(parsed.overrides.get("WIDTH"), Some("200"));
        assert_eq!(parsed.overrides.len(), 1);
    }

    #[test]
    fn plain_prompt_is_trimmed_and_has_no_overrides() {
        let parsed = parse_prompt_overrides("  a lighthouse at dusk \n");
        assert_eq!(parsed.prompt, "a lighthouse at dusk");
        assert!(parsed.overrides.is_empty());
        assert!(parsed.override_lines.is_empty());
    }

    #[test]
    fn only_first_colon_splits_key_from_value() {
        let parsed = parse_prompt_overrides("A city\nnegative_prompt: blur: heavy, text");
        assert_eq!(
            parsed.overrides.get("negative_prompt"),
            Some("blur: heavy, text")
        );
    }

    #[test]
    fn lines_without_identifier_or_value_stay_in_prompt() {
        let parsed =
            parse_prompt_overrides("A forest\nlight rays: golden\nseed:\nno colon here");
        assert!(parsed.overrides.is_empty());
        assert_eq!(
            parsed.prompt,
            "A forest\nlight rays: golden\nseed:\nno colon here"
        );
    }

    #[test]
    fn url_lines_stay_in_prompt() {
        let parsed = parse_prompt_overrides(
            "In the style of\nhttps://example.com/ref.png\n  http://x.test/a.jpg\nseed: 5",
        );
        assert_eq!(
            parsed.prompt,
            "In the style of\nhttps://example.com/ref.png\n  http://x.test/a.jpg"
        );
        assert_eq!(parsed.overrides.get("https"), None);
        assert_eq!(parsed.overrides.get("http"), None);
        assert_eq!(parsed.overrides.get("seed"), Some("5"));
    }

    #[test]
    fn prompt_without_overrides_keeps_its_line_endings() {
        let parsed = parse_prompt_overrides(" a\r\nb\r\n");
        assert_eq!(parsed.prompt, "a\r\nb");
        assert!(parsed.overrides.is_empty());
    }

    #[test]
    fn first_line_is_never_an_override() {
        let parsed = parse_prompt_overrides("Portrait: an old sailor\nseed: 7");
        assert_eq!(parsed.prompt, "Portrait: an old sailor");
        assert_eq!(parsed.overrides.get("seed"), Some("7"));
        assert_eq!(parsed.overrides.get("portrait"), None);
    }

    #[test]
    fn removed_lines_plus_cleaned_prompt_cover_the_input() {
        let input = "A harbor\nwith boats\nsteps: 30\n  cfg_scale: 9\nat night";
        let parsed = parse_prompt_overrides(input);
        assert_eq!(parsed.prompt, "A harbor\nwith boats\nat night");
        assert_eq!(parsed.override_lines, vec!["steps: 30", "  cfg_scale: 9"]);

        let mut remaining: Vec<&str> = parsed.prompt.lines().collect();
        remaining.extend(parsed.override_lines.iter().map(String::as_str));
        for line in input.lines() {
            assert!(remaining.contains(&line), "lost line {line:?}");
        }
    }
}
