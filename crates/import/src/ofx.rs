use caixa_core::{BankTransaction, DateRange, Money, RecordError};
use chrono::NaiveDate;
use encoding_rs::{UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Checking,
    Savings,
    CreditCard,
    Other,
}

impl AccountKind {
    fn from_acct_type(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "CHECKING" => AccountKind::Checking,
            "SAVINGS" | "MONEYMRKT" => AccountKind::Savings,
            "CREDITLINE" => AccountKind::CreditCard,
            _ => AccountKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatementAccount {
    pub account_id: String,
    pub bank_id: Option<String>,
    pub kind: AccountKind,
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub account: StatementAccount,
    pub period: DateRange,
    /// In file order. Duplicate FITIDs are kept as separate entries.
    pub transactions: Vec<BankTransaction>,
    pub currency: Option<String>,
    /// `LEDGERBAL/BALAMT` as reported by the bank.
    pub ledger_balance: Option<Money>,
}

impl Statement {
    /// Signed sum of every transaction.
    pub fn net_total(&self) -> Money {
        self.transactions.iter().map(|t| t.amount()).sum()
    }

    pub fn credits(&self) -> Money {
        self.transactions
            .iter()
            .map(|t| t.amount())
            .filter(|a| !a.is_negative())
            .sum()
    }

    pub fn debits(&self) -> Money {
        self.transactions
            .iter()
            .map(|t| t.amount())
            .filter(|a| a.is_negative())
            .sum()
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Not an OFX document: no <OFX> element found")]
    NotOfx,
    #[error("Statement has no bank or credit card account section")]
    MissingAccount,
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Transaction #{index} is missing {field}")]
    IncompleteTransaction { index: usize, field: &'static str },
    #[error("Invalid date format: {0}")]
    InvalidDate(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Transaction #{index} is invalid: {source}")]
    InvalidTransaction { index: usize, source: RecordError },
    #[error("Statement has no period and no transactions")]
    MissingPeriod,
    #[error("Failed to read statement: {0}")]
    Io(#[from] std::io::Error),
}

/// Encodings a statement can declare that we decode ourselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Charset {
    Utf8,
    /// Windows-1252, ISO-8859-1 and plain ASCII, all read as Windows-1252.
    SingleByte,
}

pub struct OfxParser;

impl OfxParser {
    /// Parses already-decoded statement text.
    pub fn parse(content: &str) -> Result<Statement, ParseError> {
        let start = content
            .to_ascii_uppercase()
            .find("<OFX>")
            .ok_or(ParseError::NotOfx)?;
        let body = &content[start..];

        let mut account_id: Option<String> = None;
        let mut bank_id = None;
        let mut kind = None;
        let mut saw_account_section = false;

        let mut start_date = None;
        let mut end_date = None;
        let mut currency = None;
        let mut ledger_balance = None;
        let mut transactions = Vec::new();

        let mut section = Section::None;
        let mut current_trx: Option<BuildingTrx> = None;

        for tag in tags(body) {
            if tag.closing {
                match tag.name.as_str() {
                    "STMTTRN" => {
                        if let Some(trx) = current_trx.take() {
                            let index = transactions.len() + 1;
                            transactions.push(trx.finish(index)?);
                        }
                    }
                    "BANKACCTFROM" | "CCACCTFROM" | "LEDGERBAL" => section = Section::None,
                    _ => {}
                }
                continue;
            }

            match tag.name.as_str() {
                "BANKACCTFROM" => {
                    saw_account_section = true;
                    section = Section::Account;
                }
                "CCACCTFROM" => {
                    saw_account_section = true;
                    kind = Some(AccountKind::CreditCard);
                    section = Section::Account;
                }
                "LEDGERBAL" => section = Section::LedgerBalance,
                "STMTTRN" => {
                    // SGML files may omit </STMTTRN>; a new opening tag ends the previous one.
                    if let Some(trx) = current_trx.take() {
                        let index = transactions.len() + 1;
                        transactions.push(trx.finish(index)?);
                    }
                    current_trx = Some(BuildingTrx::default());
                }
                name => {
                    let Some(value) = tag.value else { continue };
                    if let Some(ref mut trx) = current_trx {
                        trx.set(name, value)?;
                        continue;
                    }
                    match (section, name) {
                        (Section::Account, "ACCTID") => account_id = Some(value),
                        (Section::Account, "BANKID") => bank_id = Some(value),
                        (Section::Account, "ACCTTYPE") if kind.is_none() => {
                            kind = Some(AccountKind::from_acct_type(&value))
                        }
                        (Section::LedgerBalance, "BALAMT") => {
                            ledger_balance = Some(parse_ofx_amount(&value)?)
                        }
                        (_, "DTSTART") => start_date = Some(parse_ofx_date(&value)?),
                        (_, "DTEND") => end_date = Some(parse_ofx_date(&value)?),
                        (_, "CURDEF") => currency = Some(value),
                        _ => {}
                    }
                }
            }
        }

        if let Some(trx) = current_trx.take() {
            let index = transactions.len() + 1;
            transactions.push(trx.finish(index)?);
        }

        if !saw_account_section {
            return Err(ParseError::MissingAccount);
        }
        let account_id = account_id
            .filter(|id| !id.is_empty())
            .ok_or(ParseError::MissingField("ACCTID"))?;

        let period = match (start_date, end_date) {
            (Some(start), Some(end)) => DateRange::new(start, end),
            _ => DateRange::covering(transactions.iter().map(BankTransaction::date))
                .ok_or(ParseError::MissingPeriod)?,
        };

        debug!(
            account = %account_id,
            transactions = transactions.len(),
            %period,
            "Parsed OFX statement"
        );

        Ok(Statement {
            account: StatementAccount {
                account_id,
                bank_id,
                kind: kind.unwrap_or(AccountKind::Other),
            },
            period,
            transactions,
            currency,
            ledger_balance,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Account,
    LedgerBalance,
}

#[derive(Default)]
struct BuildingTrx {
    fit_id: Option<String>,
    date: Option<NaiveDate>,
    amount: Option<Money>,
    memo: Option<String>,
    name: Option<String>,
    check_number: Option<String>,
    ref_number: Option<String>,
}

impl BuildingTrx {
    fn set(&mut self, tag: &str, value: String) -> Result<(), ParseError> {
        match tag {
            "FITID" => self.fit_id = Some(value),
            "DTPOSTED" => self.date = Some(parse_ofx_date(&value)?),
            "TRNAMT" => self.amount = Some(parse_ofx_amount(&value)?),
            "MEMO" => self.memo = Some(value),
            "NAME" | "PAYEE" => self.name = Some(value),
            "CHECKNUM" => self.check_number = Some(value),
            "REFNUM" => self.ref_number = Some(value),
            _ => {}
        }
        Ok(())
    }

    fn finish(self, index: usize) -> Result<BankTransaction, ParseError> {
        let date = self.date.ok_or(ParseError::IncompleteTransaction {
            index,
            field: "DTPOSTED",
        })?;
        let amount = self.amount.ok_or(ParseError::IncompleteTransaction {
            index,
            field: "TRNAMT",
        })?;
        let fit_id = self.fit_id.ok_or(ParseError::IncompleteTransaction {
            index,
            field: "FITID",
        })?;

        let description = self
            .memo
            .filter(|m| !m.trim().is_empty())
            .or(self.name)
            .unwrap_or_default();

        let tx = BankTransaction::new(date, amount, description, fit_id)
            .map_err(|source| ParseError::InvalidTransaction { index, source })?;

        Ok(match self.check_number.or(self.ref_number) {
            Some(doc) => tx.with_document_number(doc),
            None => tx,
        })
    }
}

struct Tag {
    name: String,
    closing: bool,
    value: Option<String>,
}

/// Splits an OFX body into tags. Works for SGML (unclosed leaf tags) and XML,
/// regardless of how the tags are spread over lines.
fn tags(body: &str) -> impl Iterator<Item = Tag> + '_ {
    body.split('<').skip(1).filter_map(|chunk| {
        let (raw, rest) = chunk.split_once('>')?;
        let raw = raw.trim();
        if raw.starts_with('?') || raw.starts_with('!') {
            return None;
        }
        let (closing, name) = match raw.strip_prefix('/') {
            Some(name) => (true, name.trim()),
            None => (false, raw),
        };
        let value = rest.trim();
        Some(Tag {
            name: name.to_ascii_uppercase(),
            closing,
            value: (!value.is_empty()).then(|| unescape(value)),
        })
    })
}

fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn parse_ofx_date(s: &str) -> Result<NaiveDate, ParseError> {
    let s = s.trim();
    let invalid = || ParseError::InvalidDate(s.to_string());

    // Only the first 8 chars matter: "20240115120000[-3:BRT]" is still 2024-01-15.
    if let Some(ymd) = s.get(0..8).filter(|p| p.bytes().all(|b| b.is_ascii_digit())) {
        let y: i32 = ymd[0..4].parse().map_err(|_| invalid())?;
        let m: u32 = ymd[4..6].parse().map_err(|_| invalid())?;
        let d: u32 = ymd[6..8].parse().map_err(|_| invalid())?;
        return NaiveDate::from_ymd_opt(y, m, d).ok_or_else(invalid);
    }

    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.date_naive())
        .map_err(|_| invalid())
}

fn parse_ofx_amount(s: &str) -> Result<Money, ParseError> {
    Money::from_str(s).map_err(|_| ParseError::InvalidAmount(s.trim().to_string()))
}

/// Reads the encoding declared by the SGML header (`CHARSET:1252`,
/// `ENCODING:UTF-8`) or the XML prolog (`encoding="..."`).
fn declared_charset(data: &[u8]) -> Option<Charset> {
    let header_end = data
        .windows(5)
        .position(|w| w.eq_ignore_ascii_case(b"<OFX>"))
        .unwrap_or(data.len());
    let header: String = data[..header_end]
        .iter()
        .map(|&b| (b as char).to_ascii_uppercase())
        .collect();

    let field = |key: &str| -> Option<String> {
        let at = header.find(key)? + key.len();
        let value: String = header[at..]
            .trim_start_matches([' ', '"', '\''])
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        Some(value)
    };

    let xml_encoding = field("ENCODING=");
    let encoding = field("ENCODING:");
    let charset = field("CHARSET:");

    let is_utf8 = |v: &Option<String>| v.as_deref().is_some_and(|v| v.replace('-', "") == "UTF8");
    if is_utf8(&xml_encoding) || is_utf8(&encoding) {
        return Some(Charset::Utf8);
    }

    let single_byte = |v: &str| {
        matches!(
            v,
            "1252" | "WINDOWS1252" | "WINDOWS-1252" | "CP1252" | "ISO-8859-1" | "ISO8859-1"
                | "8859-1" | "LATIN1" | "LATIN-1" | "USASCII" | "US-ASCII"
        )
    };
    [xml_encoding, charset, encoding]
        .into_iter()
        .flatten()
        .any(|v| single_byte(&v))
        .then_some(Charset::SingleByte)
}

/// Decodes statement bytes into text, honouring the declared charset.
/// Undeclared or UTF-8 content that turns out not to be valid UTF-8 is read
/// as Windows-1252, the usual encoding of Brazilian bank exports.
pub fn decode(data: &[u8]) -> String {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);
    if declared_charset(data) == Some(Charset::SingleByte) {
        return WINDOWS_1252.decode_without_bom_handling(data).0.into_owned();
    }
    match UTF_8.decode_without_bom_handling_and_without_replacement(data) {
        Some(text) => text.into_owned(),
        None => {
            debug!("Statement is not valid UTF-8, decoding as Windows-1252");
            WINDOWS_1252.decode_without_bom_handling(data).0.into_owned()
        }
    }
}

pub fn parse(data: &[u8]) -> Result<Statement, ParseError> {
    OfxParser::parse(&decode(data))
}

pub fn parse_file(path: &Path) -> Result<Statement, ParseError> {
    let data = std::fs::read(path)?;
    parse(&data)
}
