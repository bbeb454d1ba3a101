pub mod ofx;

pub use ofx::{AccountKind, OfxParser, ParseError, Statement, StatementAccount};

pub mod import {
    use crate::*;
    use std::path::Path;

    pub fn import_ofx(data: &[u8]) -> Result<Statement, ParseError> {
        crate::ofx::parse(data)
    }

    pub fn import_ofx_file(path: &Path) -> Result<Statement, ParseError> {
        crate::ofx::parse_file(path)
    }
}
