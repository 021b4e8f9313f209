use crate::error::Result;
use crate::parser::BookParser;
use crate::path_utils::entry_stem;
use crate::types::BookRecord;

/// Parser for formats whose metadata is not read: the title is the file name stem.
///
/// Used for PDF, DJVU, ODT and TXT. Such books usually get their real metadata from an
/// fbd companion stored next to them.
#[derive(Debug, Clone, Copy, Default)]
pub struct StemParser;

impl BookParser for StemParser {
    fn parse(&self, name: &str, _bytes: &[u8]) -> Result<BookRecord> {
        Ok(BookRecord::with_title(entry_stem(name)))
    }
}
