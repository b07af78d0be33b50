use crate::ast::{Ast, Day, Filter};
use crate::directive::{Addon, Directive, Transaction};
use crate::error::Error;
use crate::flow::{Emitter, Processor};
use crate::parser::Entry;
use crate::registry::Registry;

use log::{debug, warn};

use std::sync::Arc;

/// Collects parsed entries into an [`Ast`], emitted once the input ends.
pub struct AstBuilder {
    ast: Option<Ast>,
}

impl AstBuilder {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            ast: Some(Ast::new(registry)),
        }
    }
}

impl Processor for AstBuilder {
    type Input = Entry;
    type Output = Ast;

    fn name(&self) -> &'static str {
        "ast builder"
    }

    fn process(&mut self, entry: Entry, _out: &mut Emitter<Ast>) {
        let Some(ast) = self.ast.as_mut() else {
            return;
        };
        match entry {
            Entry::Directive(directive) => ast.add(directive),
            Entry::Option { key, value } => ast.set_option(&key, &value),
            Entry::Include { path, origin, .. } => {
                warn!("{}: unresolved include of {}", origin, path);
            }
        }
    }

    fn finalize(&mut self, out: &mut Emitter<Ast>) {
        if let Some(ast) = self.ast.take() {
            debug!("ast builder: {} days", ast.len());
            out.emit(ast);
        }
    }
}

/// Expands addons and applies the account and commodity filters.
pub struct AstExpander {
    expand: bool,
    filter: Filter,
}

impl AstExpander {
    pub fn new(expand: bool, filter: Filter) -> Self {
        Self { expand, filter }
    }

    fn expand_transaction(&self, transaction: Transaction) -> Result<Vec<Transaction>, Error> {
        if let Some(addon) = transaction
            .addons
            .iter()
            .find(|a| matches!(a, Addon::Performance(_)))
        {
            return Err(Error::UnsupportedAddon {
                origin: transaction.origin.clone(),
                kind: addon.kind().to_string(),
            });
        }
        if !self.expand {
            return Ok(vec![transaction]);
        }
        let mut accruals = transaction.addons.iter().filter_map(|a| match a {
            Addon::Accrual(accrual) => Some(accrual),
            _ => None,
        });
        match accruals.next() {
            Some(accrual) => {
                if accruals.next().is_some() {
                    warn!("{}: only the first accrual is expanded", transaction.origin);
                }
                Ok(accrual.expand(&transaction))
            }
            None => Ok(vec![transaction]),
        }
    }

    fn keep(&self, registry: &Registry, directive: &Directive) -> bool {
        let filter = &self.filter;
        match directive {
            Directive::Price(_) | Directive::Open(_) | Directive::Transaction(_) => true,
            Directive::Value(v) => {
                filter.match_account(registry, v.account) && filter.match_commodity(registry, v.commodity)
            }
            Directive::Assertion(a) => {
                filter.match_account(registry, a.account) && filter.match_commodity(registry, a.commodity)
            }
            Directive::Close(c) => filter.match_account(registry, c.account),
        }
    }
}

impl Processor for AstExpander {
    type Input = Ast;
    type Output = Ast;

    fn name(&self) -> &'static str {
        "ast expander"
    }

    fn process(&mut self, ast: Ast, out: &mut Emitter<Ast>) {
        let registry = Arc::clone(ast.registry());
        let mut result = ast.empty_copy();

        for day in ast.into_days() {
            for directive in day.directives() {
                let transaction = match directive {
                    Directive::Transaction(transaction) => transaction,
                    other => {
                        if self.keep(&registry, &other) {
                            result.add(other);
                        }
                        continue;
                    }
                };
                match self.expand_transaction(transaction) {
                    Ok(expanded) => {
                        for transaction in expanded {
                            if let Some(t) = self.filter.transaction(&registry, transaction) {
                                result.add_transaction(t);
                            }
                        }
                    }
                    Err(error) => out.error(error),
                }
            }
        }
        out.emit(result);
    }
}

/// Hands the days of an [`Ast`] downstream one by one, in date order.
#[derive(Default)]
pub struct DaySplitter;

impl Processor for DaySplitter {
    type Input = Ast;
    type Output = Day;

    fn name(&self) -> &'static str {
        "day splitter"
    }

    fn process(&mut self, ast: Ast, out: &mut Emitter<Day>) {
        for day in ast.into_days() {
            out.emit(day);
        }
    }
}
