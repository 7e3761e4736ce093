use quick_xml::escape::escape;
use std::fmt::Write;

use crate::model::{Chapter, Work};

/// Metadata written to `ComicInfo.xml` inside CBZ archives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComicInfo {
    pub title: String,
    pub series: String,
    pub number: String,
    pub writer: Option<String>,
    pub summary: Option<String>,
    pub genres: Vec<String>,
    pub web: Option<String>,
    pub status: Option<String>,
    pub adult: bool,
}

impl ComicInfo {
    pub fn new(work: &Work, chapter: &Chapter) -> Self {
        let title = if chapter.title.trim().is_empty() {
            format!("Chapter {}", chapter.number)
        } else {
            chapter.title.clone()
        };

        Self {
            title,
            series: work.title.clone(),
            number: chapter.number.clone(),
            writer: work.metadata.author.clone(),
            summary: work.metadata.description.clone(),
            genres: work.metadata.genres.clone(),
            web: chapter.url.clone(),
            status: work.metadata.status.clone(),
            adult: work.metadata.adult,
        }
    }

    pub fn to_xml(&self, page_count: usize) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        xml.push_str(
            "<ComicInfo xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" \
             xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\">\n",
        );

        element(&mut xml, "Title", &self.title);
        element(&mut xml, "Series", &self.series);
        if !self.number.is_empty() {
            element(&mut xml, "Number", &self.number);
        }
        if let Some(writer) = &self.writer {
            element(&mut xml, "Writer", writer);
        }
        if let Some(summary) = &self.summary {
            element(&mut xml, "Summary", summary);
        }
        if !self.genres.is_empty() {
            element(&mut xml, "Genre", &self.genres.join(", "));
        }
        element(&mut xml, "PageCount", &page_count.to_string());
        if let Some(web) = &self.web {
            element(&mut xml, "Web", web);
        }
        element(&mut xml, "Manga", "Yes");
        if let Some(status) = &self.status {
            element(&mut xml, "Series.Status", series_status(status));
        }
        if self.adult {
            element(&mut xml, "AgeRating", "Adults Only 18+");
        }

        xml.push_str("</ComicInfo>\n");
        xml
    }
}

fn series_status(status: &str) -> &str {
    match status.to_ascii_uppercase().as_str() {
        "ONGOING" => "Ongoing",
        "COMPLETED" => "Ended",
        "HIATUS" => "Hiatus",
        _ => status,
    }
}

fn element(xml: &mut String, name: &str, value: &str) {
    // Writing into a String cannot fail
    let _ = writeln!(xml, "  <{name}>{}</{name}>", escape(value));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkMetadata;

    #[test]
    fn test_xml_contains_metadata() {
        let mut work = Work::new("w", "Tom & Jerry", vec![]);
        work.metadata = WorkMetadata {
            author: Some("Hanna".into()),
            description: None,
            genres: vec!["Comedy".into(), "Action".into()],
            status: Some("completed".into()),
            adult: true,
        };
        let mut chapter = Chapter::new("c", "4", "");
        chapter.url = Some("https://example.com/c/4?a=1&b=2".into());

        let xml = ComicInfo::new(&work, &chapter).to_xml(12);

        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<Title>Chapter 4</Title>"));
        assert!(xml.contains("<Series>Tom &amp; Jerry</Series>"));
        assert!(xml.contains("<Writer>Hanna</Writer>"));
        assert!(xml.contains("<Genre>Comedy, Action</Genre>"));
        assert!(xml.contains("<PageCount>12</PageCount>"));
        assert!(xml.contains("<Web>https://example.com/c/4?a=1&amp;b=2</Web>"));
        assert!(xml.contains("<Series.Status>Ended</Series.Status>"));
        assert!(xml.contains("<AgeRating>Adults Only 18+</AgeRating>"));
        assert!(!xml.contains("<Summary>"));
    }

    #[test]
    fn test_unknown_status_passes_through() {
        assert_eq!(series_status("Cancelled"), "Cancelled");
        assert_eq!(series_status("hiatus"), "Hiatus");
    }
}
