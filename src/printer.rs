use crate::ast::Ast;
use crate::directive::{Addon, Directive, Transaction};
use crate::registry::Registry;

use std::io::{self, Write};

/// Writes directives in journal syntax, aligning the account columns of
/// postings.
pub struct Printer<'r> {
    registry: &'r Registry,
    padding: usize,
}

impl<'r> Printer<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            padding: 0,
        }
    }

    /// Widens the account column to fit every posting of `directives`.
    pub fn initialize<'d>(&mut self, directives: impl IntoIterator<Item = &'d Directive>) {
        for directive in directives {
            if let Directive::Transaction(t) = directive {
                self.update_padding(t);
            }
        }
    }

    fn update_padding(&mut self, transaction: &Transaction) {
        for posting in &transaction.postings {
            for account in [posting.credit, posting.debit] {
                let width = self.registry.account_name(account).chars().count();
                self.padding = self.padding.max(width);
            }
        }
    }

    pub fn print_directive(&self, w: &mut impl Write, directive: &Directive) -> io::Result<()> {
        let registry = self.registry;
        match directive {
            Directive::Open(o) => write!(w, "{} open {}", o.date, registry.account_name(o.account)),
            Directive::Close(c) => write!(w, "{} close {}", c.date, registry.account_name(c.account)),
            Directive::Price(p) => write!(
                w,
                "{} price {} {} {}",
                p.date,
                registry.commodity_name(p.commodity),
                p.price,
                registry.commodity_name(p.target)
            ),
            Directive::Assertion(a) => write!(
                w,
                "{} balance {} {} {}",
                a.date,
                registry.account_name(a.account),
                a.quantity,
                registry.commodity_name(a.commodity)
            ),
            Directive::Value(v) => write!(
                w,
                "{} value {} {} {}",
                v.date,
                registry.account_name(v.account),
                v.amount,
                registry.commodity_name(v.commodity)
            ),
            Directive::Transaction(t) => self.print_transaction(w, t),
        }
    }

    fn print_transaction(&self, w: &mut impl Write, t: &Transaction) -> io::Result<()> {
        let registry = self.registry;
        for addon in &t.addons {
            match addon {
                Addon::Accrual(a) => writeln!(
                    w,
                    "@accrue {} {} {} {}",
                    a.interval,
                    a.start,
                    a.end,
                    registry.account_name(a.account)
                )?,
                Addon::Performance(commodities) => {
                    let names: Vec<String> = commodities.iter().map(|c| registry.commodity_name(*c)).collect();
                    writeln!(w, "@performance({})", names.join(","))?
                }
            }
        }
        write!(w, "{} \"{}\"", t.date, t.description)?;
        for posting in &t.postings {
            write!(
                w,
                "\n  {:<pad$} {:<pad$} {:>10} {}",
                registry.account_name(posting.credit),
                registry.account_name(posting.debit),
                posting.quantity.to_string(),
                registry.commodity_name(posting.commodity),
                pad = self.padding
            )?;
        }
        Ok(())
    }

    /// The directive as a string, without a trailing newline.
    pub fn render(&self, directive: &Directive) -> String {
        let mut buf = Vec::new();
        // writing into a Vec cannot fail
        let _ = self.print_directive(&mut buf, directive);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Prints a whole AST, day by day, grouping directives of the same kind.
pub fn print_ast(w: &mut impl Write, ast: &Ast) -> io::Result<()> {
    let registry = ast.registry();
    let mut printer = Printer::new(registry);
    for day in ast.days() {
        for t in &day.transactions {
            printer.update_padding(t);
        }
    }

    let mut options: Vec<_> = ast.options().iter().collect();
    options.sort();
    for (key, value) in &options {
        writeln!(w, "option \"{}\" \"{}\"", key, value)?;
    }
    if !options.is_empty() {
        writeln!(w)?;
    }

    for day in ast.days() {
        let mut kind = None;
        for directive in day.directives() {
            let priority = directive.priority();
            if kind.is_some_and(|k| k != priority) {
                writeln!(w)?;
            }
            kind = Some(priority);
            printer.print_directive(w, &directive)?;
            writeln!(w)?;
            if let Directive::Transaction(_) = directive {
                writeln!(w)?;
                kind = None;
            }
        }
        if kind.is_some() {
            writeln!(w)?;
        }
    }
    Ok(())
}
