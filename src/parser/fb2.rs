use crate::error::{Error, Result};
use crate::parser::xml::{XmlHelper, XmlNode};
use crate::parser::{BookParser, normalize_date};
use crate::types::BookRecord;

const DESCRIPTION_END: &[u8] = b"</description>";

/// Parser for FictionBook 2 documents and fbd description sidecars.
///
/// Only the `<title-info>` block of the `<description>` is read; the body is never
/// decoded. Authors are stored as "LastName FirstName MiddleName", several authors
/// joined by `", "`, genres joined by `","`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fb2Parser {
    xml: XmlHelper,
}

impl Fb2Parser {
    /// The part of the document up to and including `</description>`.
    fn description_bytes(bytes: &[u8]) -> &[u8] {
        bytes
            .windows(DESCRIPTION_END.len())
            .position(|window| window == DESCRIPTION_END)
            .map_or(bytes, |start| &bytes[..start + DESCRIPTION_END.len()])
    }

    fn author(author: &XmlNode) -> String {
        let parts: Vec<String> = ["last-name", "first-name", "middle-name"]
            .iter()
            .map(|tag| author.find_text(tag))
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() {
            author.find_text("nickname")
        } else {
            parts.join(" ")
        }
    }
}

impl BookParser for Fb2Parser {
    fn parse(&self, name: &str, bytes: &[u8]) -> Result<BookRecord> {
        let doc = self.xml.decode(Self::description_bytes(bytes));
        let root = self
            .xml
            .parse(&doc)
            .map_err(|e| Error::parse(name, e.to_string()))?;
        let info = root
            .find("title-info")
            .ok_or_else(|| Error::parse(name, "no <title-info> in description"))?;

        let author = info
            .find_all("author")
            .into_iter()
            .map(Self::author)
            .filter(|author| !author.is_empty())
            .collect::<Vec<_>>()
            .join(", ");

        let genre = info
            .find_all("genre")
            .into_iter()
            .map(XmlNode::text)
            .filter(|genre| !genre.is_empty())
            .collect::<Vec<_>>()
            .join(",");

        let series = info
            .find_all("sequence")
            .into_iter()
            .find_map(|sequence| sequence.attribute("name"))
            .map(|series| series.trim().to_string())
            .unwrap_or_default();

        let date = info
            .find("date")
            .map(|date| match date.attribute("value") {
                Some(value) if !value.trim().is_empty() => value.to_string(),
                _ => date.text(),
            })
            .map(|date| normalize_date(&date))
            .unwrap_or_default();

        Ok(BookRecord {
            path_in_container: String::new(),
            author,
            title: info.find_text("book-title"),
            series,
            genre,
            date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<FictionBook xmlns="http://www.gribuser.ru/xml/fictionbook/2.0">
  <description>
    <title-info>
      <genre>sf</genre>
      <genre>sf_humor</genre>
      <author>
        <first-name>John</first-name>
        <middle-name>Q</middle-name>
        <last-name>Smith</last-name>
      </author>
      <author><nickname>Anon</nickname></author>
      <book-title>Foo &amp; Bar</book-title>
      <date value="2001-05-01">2001</date>
      <sequence name="Great Saga" number="2"/>
    </title-info>
    <document-info><author><last-name>Editor</last-name></author></document-info>
  </description>
  <body><p>Text</p></body>
</FictionBook>"#;

    #[test]
    fn test_parse_title_info() {
        let record = Fb2Parser::default()
            .parse("foo.fb2", SAMPLE.as_bytes())
            .unwrap();
        assert_eq!(record.author, "Smith John Q, Anon");
        assert_eq!(record.title, "Foo & Bar");
        assert_eq!(record.genre, "sf,sf_humor");
        assert_eq!(record.series, "Great Saga");
        assert_eq!(record.date, "2001-05-01");
        assert!(record.path_in_container.is_empty());
    }

    #[test]
    fn test_commented_markup_and_brackets_in_attributes() {
        let doc = r#"<FictionBook><description><title-info>
            <!-- <book-title>Draft Name</book-title> -->
            <book-title>Final Name</book-title>
            <sequence name="Earth > Mars" number="1"/>
        </title-info></description></FictionBook>"#;
        let record = Fb2Parser::default().parse("c.fb2", doc.as_bytes()).unwrap();
        assert_eq!(record.title, "Final Name");
        assert_eq!(record.series, "Earth > Mars");
    }

    #[test]
    fn test_missing_title_info_is_parse_error() {
        let result = Fb2Parser::default().parse("broken.fb2", b"<FictionBook/>");
        assert!(matches!(result, Err(Error::Parse { .. })));
    }
}
