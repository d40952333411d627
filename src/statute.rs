//! Statute article records and the reader's filtering rules.

use serde::{Deserialize, Serialize};

/// How many articles the unfiltered list shows.
pub const DEFAULT_DISPLAY_LIMIT: usize = 500;

/// One article row of a statute table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
  pub id: i64,
  #[serde(rename = "Número do Artigo", default)]
  pub number: Option<String>,
  #[serde(rename = "Artigo", default)]
  pub text: Option<String>,
  #[serde(rename = "Narração", default)]
  pub narration: Option<String>,
  #[serde(rename = "Comentario", default)]
  pub commentary: Option<String>,
  #[serde(rename = "Aula", default)]
  pub lesson: Option<String>,
}

impl Article {
  /// Trimmed article number, empty when missing.
  pub fn number(&self) -> &str {
    self.number.as_deref().unwrap_or("").trim()
  }

  pub fn text(&self) -> &str {
    self.text.as_deref().unwrap_or("")
  }

  pub fn has_narration(&self) -> bool {
    is_filled(&self.narration) && !self.number().is_empty()
  }
}

fn is_filled(value: &Option<String>) -> bool {
  value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Articles whose number or text contains `query`, case-insensitively.
///
/// An empty (or blank) query matches everything.
pub fn search<'a>(articles: &'a [Article], query: &str) -> Vec<&'a Article> {
  let needle = query.trim().to_lowercase();
  if needle.is_empty() {
    return articles.iter().collect();
  }

  articles
    .iter()
    .filter(|article| {
      article.number().to_lowercase().contains(&needle)
        || article.text().to_lowercase().contains(&needle)
    })
    .collect()
}

/// What the reader shows: every match for a search, otherwise the first
/// `limit` articles.
pub fn display_window<'a>(articles: &'a [Article], query: &str, limit: usize) -> Vec<&'a Article> {
  let matches = search(articles, query);
  if query.trim().is_empty() {
    matches.into_iter().take(limit).collect()
  } else {
    matches
  }
}

/// Articles with a narration and a number, in order (the audio playlist).
pub fn with_narration(articles: &[Article]) -> Vec<&Article> {
  articles.iter().filter(|a| a.has_narration()).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn article(id: i64, number: &str, text: &str) -> Article {
    Article {
      id,
      number: Some(number.to_string()),
      text: Some(text.to_string()),
      narration: None,
      commentary: None,
      lesson: None,
    }
  }

  fn sample() -> Vec<Article> {
    vec![
      article(1, "1º", "Ocultar ou dissimular a natureza, origem, localização"),
      article(2, "2º", "O processo e julgamento dos crimes previstos nesta Lei"),
      article(3, " 12 ", "As pessoas referidas no art. 9º"),
    ]
  }

  #[test]
  fn test_deserializes_table_columns() {
    let json = r#"{
      "id": 7,
      "Número do Artigo": "7º",
      "Artigo": "São efeitos da condenação",
      "Narração": "https://cdn.example/7.mp3",
      "Comentario": null
    }"#;

    let parsed: Article = serde_json::from_str(json).unwrap();

    assert_eq!(parsed.id, 7);
    assert_eq!(parsed.number(), "7º");
    assert_eq!(parsed.narration.as_deref(), Some("https://cdn.example/7.mp3"));
    assert_eq!(parsed.commentary, None);
    assert_eq!(parsed.lesson, None);
  }

  #[test]
  fn test_search_matches_text_case_insensitively() {
    let articles = sample();
    let found = search(&articles, "  PROCESSO ");
    assert_eq!(found.iter().map(|a| a.id).collect::<Vec<_>>(), vec![2]);
  }

  #[test]
  fn test_search_matches_number() {
    let articles = sample();
    let found = search(&articles, "12");
    assert_eq!(found.iter().map(|a| a.id).collect::<Vec<_>>(), vec![3]);
  }

  #[test]
  fn test_blank_search_matches_all() {
    let articles = sample();
    assert_eq!(search(&articles, "   ").len(), 3);
  }

  #[test]
  fn test_display_window_caps_only_unfiltered() {
    let articles: Vec<Article> = (1..=10)
      .map(|i| article(i, &i.to_string(), "texto"))
      .collect();

    assert_eq!(display_window(&articles, "", 4).len(), 4);
    assert_eq!(display_window(&articles, "texto", 4).len(), 10);
  }

  #[test]
  fn test_playlist_needs_narration_and_number() {
    let mut articles = sample();
    articles[0].narration = Some("a.mp3".to_string());
    articles[1].narration = Some("   ".to_string());
    articles[2].narration = Some("c.mp3".to_string());
    articles[2].number = Some("  ".to_string());

    let playlist = with_narration(&articles);

    assert_eq!(playlist.iter().map(|a| a.id).collect::<Vec<_>>(), vec![1]);
  }
}
