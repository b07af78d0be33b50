use crate::date::Interval;
use crate::directive::{
    Accrual, Addon, Assertion, Close, Directive, Open, Origin, Posting, Price, Transaction, Value,
};
use crate::error::{Error, Result};
use crate::flow::{self, Link};
use crate::registry::{Account, Commodity, Registry};

use chrono::NaiveDate;
use log::{debug, info};
use pest::error::LineColLocation;
use pest::iterators::{Pair, Pairs};
use pest::Parser;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser)]
#[grammar = "ledger.pest"]
pub struct LedgerParser;

/// One top-level element of a journal file.
#[derive(Clone, Debug, PartialEq)]
pub enum Entry {
    Directive(Directive),
    Option { key: String, value: String },
    Include { path: String, origin: Origin, column: usize },
}

/// Parses one journal file. Includes are returned unresolved, see
/// [`RecursiveParser`] for following them. Fails on the first syntax error.
pub fn parse(input: &str, file: &str, registry: &Registry) -> Result<Vec<Entry>> {
    let mut ledger = LedgerParser::parse(Rule::ledger, input).map_err(|e| syntax_error(file, e))?;
    let ctx = FileParser {
        file: Arc::from(file),
        registry,
    };

    let mut entries = Vec::new();
    if let Some(ledger) = ledger.next() {
        for item in ledger.into_inner() {
            if item.as_rule() != Rule::EOI {
                ctx.parse_item(item, &mut entries)?;
            }
        }
    }
    Ok(entries)
}

fn syntax_error(file: &str, err: pest::error::Error<Rule>) -> Error {
    let position = match err.line_col {
        LineColLocation::Pos(pos) => pos,
        LineColLocation::Span(start, _) => start,
    };
    Error::syntax(file, position, err.variant.message())
}

pub fn inner_str(token: Pair<'_, Rule>) -> &str {
    token.into_inner().next().map_or("", |inner| inner.as_str())
}

macro_rules! parse_next {
    ($ctx:ident, $method:ident, $pairs:ident, $at:expr) => {
        $ctx.$method($pairs.next().ok_or_else(|| {
            $ctx.error(
                &$at,
                format!("invalid next token, expected {}", stringify!($method)),
            )
        })?)?
    };
}

const KEYWORDS: [&str; 5] = ["open", "close", "price", "balance", "value"];

struct FileParser<'r> {
    file: Arc<str>,
    registry: &'r Registry,
}

impl<'r> FileParser<'r> {
    fn origin(&self, token: &Pair<'_, Rule>) -> Origin {
        Origin::new(Arc::clone(&self.file), token.as_span().start_pos().line_col().0)
    }

    fn column(&self, token: &Pair<'_, Rule>) -> usize {
        token.as_span().start_pos().line_col().1
    }

    fn error(&self, token: &Pair<'_, Rule>, message: impl Into<String>) -> Error {
        Error::syntax(&self.file, token.as_span().start_pos().line_col(), message)
    }

    fn parse_item(&self, item: Pair<'_, Rule>, entries: &mut Vec<Entry>) -> Result<()> {
        match item.as_rule() {
            Rule::include => {
                let origin = self.origin(&item);
                let column = self.column(&item);
                let path = self.quoted(item.into_inner().next())?;
                entries.push(Entry::Include { path, origin, column });
            }
            Rule::option => {
                let mut pairs = item.into_inner();
                let key = self.quoted(pairs.next())?;
                let value = self.quoted(pairs.next())?;
                entries.push(Entry::Option { key, value });
            }
            Rule::directive => self.parse_directive(item, entries)?,
            _ => return Err(self.error(&item, format!("unexpected token: {}", item.as_str()))),
        }
        Ok(())
    }

    fn parse_directive(&self, directive: Pair<'_, Rule>, entries: &mut Vec<Entry>) -> Result<()> {
        let at = directive.clone();
        let mut pairs = directive.into_inner();
        let mut addons = Vec::new();

        let date = loop {
            let token = pairs
                .next()
                .ok_or_else(|| self.error(&at, "invalid next token, expected date"))?;
            match token.as_rule() {
                Rule::accrue => addons.push(self.accrual(token)?),
                Rule::performance => addons.push(self.performance(token)?),
                Rule::date => break token,
                _ => return Err(self.error(&token, "expected addon or date")),
            }
        };
        let origin = self.origin(&date);
        let date = self.date(date)?;
        let command = pairs
            .next()
            .ok_or_else(|| self.error(&at, "invalid next token, expected command"))?;

        if !addons.is_empty() && command.as_rule() != Rule::transaction {
            return Err(self.error(&command, "addons are only allowed on transactions"));
        }

        let at = command.clone();
        let rule = command.as_rule();
        let mut pairs = command.into_inner();
        let directive: Directive = match rule {
            Rule::open => Open {
                date,
                account: parse_next!(self, account, pairs, at),
                origin,
            }
            .into(),
            Rule::close => Close {
                date,
                account: parse_next!(self, account, pairs, at),
                origin,
            }
            .into(),
            Rule::price => Price {
                date,
                commodity: parse_next!(self, commodity, pairs, at),
                price: parse_next!(self, decimal, pairs, at),
                target: parse_next!(self, commodity, pairs, at),
                origin,
            }
            .into(),
            Rule::value => Value {
                date,
                account: parse_next!(self, account, pairs, at),
                amount: parse_next!(self, decimal, pairs, at),
                commodity: parse_next!(self, commodity, pairs, at),
                origin,
            }
            .into(),
            Rule::balance => {
                for assertion in pairs {
                    let origin = self.origin(&assertion);
                    let at = assertion.clone();
                    let mut pairs = assertion.into_inner();
                    entries.push(Entry::Directive(
                        Assertion {
                            date,
                            account: parse_next!(self, account, pairs, at),
                            quantity: parse_next!(self, decimal, pairs, at),
                            commodity: parse_next!(self, commodity, pairs, at),
                            origin,
                        }
                        .into(),
                    ));
                }
                return Ok(());
            }
            Rule::transaction => {
                let description = self.quoted(pairs.next())?;
                Transaction {
                    date,
                    description,
                    postings: self.postings(pairs)?,
                    addons,
                    origin,
                }
                .into()
            }
            Rule::unknown => {
                let keyword = pairs.next().map_or("", |k| k.as_str());
                if KEYWORDS.contains(&keyword) {
                    return Err(self.error(&at, format!("invalid arguments for `{}'", keyword)));
                }
                return Err(Error::UnknownDirective {
                    origin,
                    column: self.column(&at),
                    keyword: keyword.to_string(),
                });
            }
            _ => return Err(self.error(&at, format!("unexpected token: {}", at.as_str()))),
        };
        entries.push(Entry::Directive(directive));
        Ok(())
    }

    fn postings(&self, pairs: Pairs<'_, Rule>) -> Result<Vec<Posting>> {
        let mut postings = Vec::new();
        for posting in pairs {
            let at = posting.clone();
            let mut pairs = posting.into_inner();
            let credit = parse_next!(self, account, pairs, at);
            let debit = parse_next!(self, account, pairs, at);
            let quantity = parse_next!(self, decimal, pairs, at);
            let commodity = parse_next!(self, commodity, pairs, at);
            postings.push(Posting::new(credit, debit, commodity, quantity));
        }
        Ok(postings)
    }

    fn accrual(&self, token: Pair<'_, Rule>) -> Result<Addon> {
        let at = token.clone();
        let mut pairs = token.into_inner();
        let interval = parse_next!(self, interval, pairs, at);
        let start = parse_next!(self, date, pairs, at);
        let end = parse_next!(self, date, pairs, at);
        let account = parse_next!(self, account, pairs, at);
        if end < start {
            return Err(self.error(&at, format!("accrual ends ({}) before it starts ({})", end, start)));
        }
        Ok(Addon::Accrual(Accrual {
            interval,
            start,
            end,
            account,
        }))
    }

    fn performance(&self, token: Pair<'_, Rule>) -> Result<Addon> {
        let commodities = token
            .into_inner()
            .map(|c| self.commodity(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(Addon::Performance(commodities))
    }

    fn date(&self, token: Pair<'_, Rule>) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(token.as_str(), "%Y-%m-%d")
            .map_err(|e| self.error(&token, format!("invalid date `{}': {}", token.as_str(), e)))
    }

    fn account(&self, token: Pair<'_, Rule>) -> Result<Account> {
        self.registry
            .account(token.as_str())
            .map_err(|e| self.error(&token, e.to_string()))
    }

    fn commodity(&self, token: Pair<'_, Rule>) -> Result<Commodity> {
        Ok(self.registry.commodity(token.as_str()))
    }

    fn decimal(&self, token: Pair<'_, Rule>) -> Result<Decimal> {
        Decimal::from_str(token.as_str())
            .map_err(|e| self.error(&token, format!("invalid decimal `{}': {}", token.as_str(), e)))
    }

    fn interval(&self, token: Pair<'_, Rule>) -> Result<Interval> {
        token
            .as_str()
            .parse()
            .map_err(|e: Error| self.error(&token, e.to_string()))
    }

    fn quoted(&self, token: Option<Pair<'_, Rule>>) -> Result<String> {
        match token {
            Some(token) if token.as_rule() == Rule::quoted => Ok(inner_str(token).to_string()),
            Some(token) => Err(self.error(&token, "expected quoted string")),
            None => Err(Error::syntax(&self.file, (0, 0), "expected quoted string")),
        }
    }
}

/// Lexically resolves `.` and `..` so that the same file is recognised
/// whichever way it was included.
fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(result.components().next_back(), Some(Component::Normal(_)))
                    && result.pop();
                if !popped {
                    result.push("..");
                }
            }
            other => result.push(other.as_os_str()),
        }
    }
    result
}

struct Frame {
    path: PathBuf,
    entries: std::vec::IntoIter<Entry>,
}

enum Step {
    Entry(Entry),
    Load(PathBuf, Origin, usize),
    Done,
}

/// Walks a tree of included files depth first, in file order, without
/// doing any IO itself.
struct IncludeStack {
    registry: Arc<Registry>,
    frames: Vec<Frame>,
}

impl IncludeStack {
    fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            frames: Vec::new(),
        }
    }

    fn step(&mut self) -> Step {
        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Step::Done;
            };
            match frame.entries.next() {
                None => {
                    self.frames.pop();
                }
                Some(Entry::Include { path, origin, column }) => {
                    let base = frame.path.parent().unwrap_or_else(|| Path::new(""));
                    return Step::Load(normalize(&base.join(path)), origin, column);
                }
                Some(entry) => return Step::Entry(entry),
            }
        }
    }

    fn check_cycle(&self, path: &Path, origin: &Origin, column: usize) -> Result<()> {
        if !self.frames.iter().any(|f| f.path == path) {
            return Ok(());
        }
        let mut chain: Vec<String> = self
            .frames
            .iter()
            .map(|f| f.path.display().to_string())
            .collect();
        chain.push(path.display().to_string());
        Err(Error::IncludeCycle {
            file: origin.to_string(),
            column,
            chain,
        })
    }

    fn enter(&mut self, path: PathBuf, input: &str) -> Result<()> {
        let entries = parse(input, &path.display().to_string(), &self.registry)?;
        debug!("{}: {} entries", path.display(), entries.len());
        self.frames.push(Frame {
            path,
            entries: entries.into_iter(),
        });
        Ok(())
    }
}

/// Parses a journal file and every file it includes, splicing included
/// directives in place of the include line. Include paths are relative to
/// the including file.
#[derive(Clone, Debug)]
pub struct RecursiveParser {
    registry: Arc<Registry>,
    root: PathBuf,
}

impl RecursiveParser {
    pub fn new(registry: Arc<Registry>, root: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            root: root.into(),
        }
    }

    /// Parses everything in the calling thread.
    pub fn parse_all(&self) -> Result<Vec<Entry>> {
        let mut stack = IncludeStack::new(Arc::clone(&self.registry));
        let root = normalize(&self.root);
        info!("parsing {}", root.display());
        stack.enter(root.clone(), &read_file(&root)?)?;

        let mut entries = Vec::new();
        loop {
            match stack.step() {
                Step::Entry(entry) => entries.push(entry),
                Step::Load(path, origin, column) => {
                    stack.check_cycle(&path, &origin, column)?;
                    debug!("{}: including {}", origin, path.display());
                    let input = read_file(&path)?;
                    stack.enter(path, &input)?;
                }
                Step::Done => return Ok(entries),
            }
        }
    }

    /// Parses on a background task, sending entries one by one.
    pub fn stream(self, token: &CancellationToken, capacity: usize) -> Link<Entry> {
        let (tx, rx) = mpsc::channel(capacity);
        let (etx, erx) = mpsc::channel(capacity);

        let worker = {
            let token = token.clone();
            let etx = etx.clone();
            tokio::spawn(async move {
                if let Err(error) = self.run(&token, &tx).await {
                    let _ = flow::push(&token, &etx, error).await;
                }
            })
        };
        flow::supervise(token, "parser", etx, worker);

        Link::new(rx, erx)
    }

    async fn run(&self, token: &CancellationToken, tx: &mpsc::Sender<Entry>) -> Result<()> {
        let mut stack = IncludeStack::new(Arc::clone(&self.registry));
        let root = normalize(&self.root);
        info!("parsing {}", root.display());
        let input = read_file_async(&root).await?;
        stack.enter(root, &input)?;

        loop {
            match stack.step() {
                Step::Entry(entry) => {
                    if flow::push(token, tx, entry).await.is_err() {
                        debug!("parser: cancelled");
                        return Ok(());
                    }
                }
                Step::Load(path, origin, column) => {
                    stack.check_cycle(&path, &origin, column)?;
                    debug!("{}: including {}", origin, path.display());
                    let input = read_file_async(&path).await?;
                    stack.enter(path, &input)?;
                }
                Step::Done => return Ok(()),
            }
        }
    }
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })
}

async fn read_file_async(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })
}
