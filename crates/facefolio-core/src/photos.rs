//! Read-only photo records supplied by the surrounding application.

use serde::{Deserialize, Serialize};

pub const UNKNOWN_DATE: &str = "Unknown date";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: String,
    pub url: String,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
}

/// Ordered photo list. Lookups are by url, first match wins.
#[derive(Debug, Clone, Default)]
pub struct PhotoLibrary {
    photos: Vec<PhotoRecord>,
}

impl PhotoLibrary {
    pub fn new(photos: Vec<PhotoRecord>) -> Self {
        Self { photos }
    }

    pub fn find(&self, url: &str) -> Option<&PhotoRecord> {
        self.photos.iter().find(|p| p.url == url)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&PhotoRecord> {
        self.photos.iter().find(|p| p.id == id)
    }

    /// Date label for a slot. Edited images carry fresh handles, so the
    /// originally placed url is tried first.
    pub fn date_label(&self, original: Option<&str>, current: Option<&str>) -> String {
        original
            .or(current)
            .and_then(|url| self.find(url))
            .map(|p| p.date.clone())
            .unwrap_or_else(|| UNKNOWN_DATE.to_string())
    }

    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhotoRecord> {
        self.photos.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> PhotoLibrary {
        PhotoLibrary::new(vec![
            PhotoRecord {
                id: "p1".into(),
                url: "photos/before.jpg".into(),
                date: "2024-03-01".into(),
                patient_id: Some("pt-9".into()),
            },
            PhotoRecord {
                id: "p2".into(),
                url: "photos/after.jpg".into(),
                date: "2024-09-12".into(),
                patient_id: None,
            },
        ])
    }

    #[test]
    fn test_date_label_prefers_original() {
        let lib = library();
        let label = lib.date_label(Some("photos/before.jpg"), Some("blob:1234"));
        assert_eq!(label, "2024-03-01");
    }

    #[test]
    fn test_date_label_falls_back_to_current() {
        let lib = library();
        assert_eq!(lib.date_label(None, Some("photos/after.jpg")), "2024-09-12");
    }

    #[test]
    fn test_date_label_unknown() {
        let lib = library();
        assert_eq!(lib.date_label(Some("blob:zz"), None), UNKNOWN_DATE);
        assert_eq!(lib.date_label(None, None), UNKNOWN_DATE);
    }

    #[test]
    fn test_record_deserialize_without_patient() {
        let rec: PhotoRecord =
            serde_json::from_str(r#"{"id":"a","url":"u","date":"d"}"#).unwrap();
        assert!(rec.patient_id.is_none());
        assert_eq!(library().find_by_id("p2").map(|p| p.url.as_str()), Some("photos/after.jpg"));
    }
}
