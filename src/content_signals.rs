//! Shared text heuristics used by the prediction engine and the viral
//! score fallback.

const CTA_KEYWORDS: [&str; 14] = [
  "comment below",
  "share your",
  "tag a friend",
  "tag someone",
  "follow for",
  "link in bio",
  "sign up",
  "subscribe",
  "dm me",
  "save this",
  "join us",
  "learn more",
  "tell us",
  "click the link",
];

pub fn contains_cta(content: &str) -> bool {
  let lower = content.to_ascii_lowercase();
  CTA_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn is_emoji(ch: char) -> bool {
  let cp = ch as u32;
  (0x1F300..=0x1FAFF).contains(&cp)
    || (0x2600..=0x27BF).contains(&cp)
    || (0x1F1E6..=0x1F1FF).contains(&cp)
}

pub fn count_emoji(content: &str) -> usize {
  content.chars().filter(|ch| is_emoji(*ch)).count()
}

/// A post "hooks" when its first character demands attention: a capital
/// letter, an emoji, or punctuation that opens a question/exclamation.
pub fn has_strong_hook(content: &str) -> bool {
  match content.trim_start().chars().next() {
    Some(ch) => ch.is_uppercase() || is_emoji(ch) || ch == '?' || ch == '!',
    None => false,
  }
}

pub fn first_line(content: &str) -> &str {
  content.lines().next().unwrap_or("")
}

pub fn char_count(content: &str) -> usize {
  content.chars().count()
}

/// Lowercase and strip the leading '#', so "#Growth" and "growth" group
/// together.
pub fn normalize_hashtag(tag: &str) -> String {
  tag.trim().trim_start_matches('#').to_lowercase()
}
