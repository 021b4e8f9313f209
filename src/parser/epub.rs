use std::io::{Cursor, Read, Seek};

use zip::ZipArchive;

use crate::archive;
use crate::error::{Error, Result};
use crate::parser::xml::{XmlHelper, XmlNode};
use crate::parser::{BookParser, normalize_date};
use crate::types::BookRecord;

const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Parser for EPUB packages: reads the Dublin Core metadata of the OPF document.
///
/// Creators are taken from `opf:file-as` when present (usually "Surname, First"), so
/// they line up with the "Surname First" order used for FB2 books.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpubParser {
    xml: XmlHelper,
}

fn read_named<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut file = archive
        .by_name(name)
        .map_err(|e| Error::archive("extract", e))?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;
    Ok(buffer)
}

impl EpubParser {
    fn creator(creator: &XmlNode) -> String {
        match creator.attribute("file-as") {
            Some(file_as) if !file_as.trim().is_empty() => file_as
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" "),
            _ => creator.text(),
        }
    }

    fn series(metadata: &XmlNode) -> String {
        let metas = metadata.find_all("meta");
        let calibre = metas.iter().find_map(|meta| {
            (meta.attribute("name") == Some("calibre:series"))
                .then(|| meta.attribute("content").map(str::to_string))
                .flatten()
        });
        let collection = || {
            metas.iter().find_map(|meta| {
                (meta.attribute("property") == Some("belongs-to-collection")).then(|| meta.text())
            })
        };
        calibre
            .or_else(collection)
            .map(|series| series.trim().to_string())
            .unwrap_or_default()
    }

    fn read_xml<R: Read + Seek>(
        &self,
        package: &mut ZipArchive<R>,
        name: &str,
        entry: &str,
    ) -> Result<XmlNode> {
        let doc = self.xml.decode(&read_named(package, entry)?);
        self.xml
            .parse(&doc)
            .map_err(|e| Error::parse(name, format!("{}: {}", entry, e)))
    }
}

impl BookParser for EpubParser {
    fn parse(&self, name: &str, bytes: &[u8]) -> Result<BookRecord> {
        let mut package = archive::open_reader(Cursor::new(bytes))?;

        let container = self.read_xml(&mut package, name, CONTAINER_PATH)?;
        let opf_path = container
            .find("rootfile")
            .and_then(|rootfile| rootfile.attribute("full-path"))
            .ok_or_else(|| Error::parse(name, "container.xml names no rootfile"))?;

        let opf = self.read_xml(&mut package, name, opf_path)?;
        let metadata = opf.find("metadata").unwrap_or(&opf);

        let author = metadata
            .find_all("creator")
            .into_iter()
            .map(Self::creator)
            .filter(|creator| !creator.is_empty())
            .collect::<Vec<_>>()
            .join(", ");

        let genre = metadata
            .find_all("subject")
            .into_iter()
            .map(XmlNode::text)
            .filter(|subject| !subject.is_empty())
            .collect::<Vec<_>>()
            .join(",");

        Ok(BookRecord {
            path_in_container: String::new(),
            author,
            title: metadata.find_text("title"),
            series: Self::series(metadata),
            genre,
            date: normalize_date(&metadata.find_text("date")),
        })
    }
}
