use crate::ast::{Ast, Filter};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::flow::{connect, demultiplex, drain, run_batch, Link, Outcome};
use crate::parser::{parse, RecursiveParser};
use crate::process::{
    AstBuilder, AstExpander, Balancer, DaySplitter, Differ, PeriodFilter, PriceUpdater, Snapshot, Valuator,
};
use crate::registry::Registry;

use log::{debug, info};
use tokio_util::sync::CancellationToken;

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Every stage after the AST has been built, configured for one run.
struct Stages {
    expander: AstExpander,
    splitter: DaySplitter,
    balancer: Balancer,
    prices: PriceUpdater,
    valuator: Valuator,
    periods: PeriodFilter,
    differ: Differ,
}

impl Stages {
    fn new(config: &Config, registry: &Arc<Registry>) -> Result<Self> {
        let valuation = config.valuation.as_deref().map(|v| registry.commodity(v));
        let account = registry.account(&config.valuation_account)?;
        let filter = Filter::new(config.accounts.clone(), config.commodities.clone());
        Ok(Self {
            expander: AstExpander::new(config.expand, filter),
            splitter: DaySplitter,
            balancer: Balancer::new(Arc::clone(registry)),
            prices: PriceUpdater::new(Arc::clone(registry), valuation),
            valuator: Valuator::new(Arc::clone(registry), valuation, account),
            periods: PeriodFilter::new(config.from, config.to, config.interval, config.last),
            differ: Differ::new(Arc::clone(registry), config.diff),
        })
    }
}

/// A journal loaded into memory, processed in the calling thread.
#[derive(Clone, Debug)]
pub struct Journal {
    ast: Ast,
}

impl Journal {
    /// Parses `path` and everything it includes.
    pub fn load(path: impl AsRef<Path>) -> Result<Journal> {
        let registry = Arc::new(Registry::new());
        let entries = RecursiveParser::new(Arc::clone(&registry), path.as_ref()).parse_all()?;
        Self::build(registry, entries)
    }

    /// Parses a single journal held in memory. Includes are not followed.
    pub fn from_text(text: &str, file: &str) -> Result<Journal> {
        let registry = Arc::new(Registry::new());
        let entries = parse(text, file, &registry)?;
        Self::build(registry, entries)
    }

    fn build(registry: Arc<Registry>, entries: Vec<crate::parser::Entry>) -> Result<Journal> {
        let ast = run_batch(AstBuilder::new(Arc::clone(&registry)), entries)?
            .pop()
            .unwrap_or_else(|| Ast::new(registry));
        info!("loaded {} days", ast.len());
        Ok(Journal { ast })
    }

    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.ast.registry()
    }

    /// The default configuration with the journal's `option` lines applied.
    pub fn config(&self) -> Result<Config> {
        let mut config = Config::default();
        let mut options: Vec<_> = self.ast.options().iter().collect();
        options.sort();
        for (key, value) in options {
            if !config.apply_option(key, value)? {
                debug!("option `{}' is not a setting", key);
            }
        }
        Ok(config)
    }

    /// Books, valuates and partitions the journal. Stops at the first error.
    pub fn balances(&self, config: &Config) -> Result<Vec<Snapshot>> {
        config.validate()?;
        let stages = Stages::new(config, self.registry())?;

        let asts = run_batch(stages.expander, vec![self.ast.clone()])?;
        let days = run_batch(stages.splitter, asts)?;
        let days = run_batch(stages.balancer, days)?;
        let days = run_batch(stages.prices, days)?;
        let days = run_batch(stages.valuator, days)?;
        let snapshots = run_batch(stages.periods, days)?;
        run_batch(stages.differ, snapshots)
    }
}

/// Processes a journal file as a stream, one task per stage.
///
/// Stages are linked by channels of `config.capacity` items. Errors of all
/// stages are merged and reported together once the run ends.
#[derive(Debug)]
pub struct Pipeline {
    config: Config,
    registry: Arc<Registry>,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(Registry::new());
        registry.account(&config.valuation_account)?;
        Ok(Self { config, registry })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub async fn run(&self, path: impl Into<PathBuf>, token: &CancellationToken) -> Outcome<Vec<Snapshot>> {
        let stages = match Stages::new(&self.config, &self.registry) {
            Ok(stages) => stages,
            Err(error) => return failed(error),
        };
        let capacity = self.config.capacity;

        let parsed = RecursiveParser::new(Arc::clone(&self.registry), path).stream(token, capacity);
        let built = connect(token, capacity, AstBuilder::new(Arc::clone(&self.registry)), parsed.items);
        let expanded = connect(token, capacity, stages.expander, built.items);
        let days = connect(token, capacity, stages.splitter, expanded.items);
        let booked = connect(token, capacity, stages.balancer, days.items);
        let priced = connect(token, capacity, stages.prices, booked.items);
        let valuated = connect(token, capacity, stages.valuator, priced.items);
        let periods = connect(token, capacity, stages.periods, valuated.items);
        let snapshots = connect(token, capacity, stages.differ, periods.items);

        let errors = demultiplex(
            token,
            capacity,
            vec![
                parsed.errors,
                built.errors,
                expanded.errors,
                days.errors,
                booked.errors,
                priced.errors,
                valuated.errors,
                periods.errors,
                snapshots.errors,
            ],
        );
        drain(token, Link::new(snapshots.items, errors)).await
    }
}

fn failed(error: Error) -> Outcome<Vec<Snapshot>> {
    Outcome::Failed {
        partial: Vec::new(),
        errors: vec![error],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amounts::Position;
    use crate::date::Interval;
    use crate::error::RunError;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::fs;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    const FOOD: &str = r#"
2023-01-01 open Assets:Cash
2023-01-01 open Expenses:Food

2023-01-01 "Groceries"
  Assets:Cash Expenses:Food 10.00 USD

2023-01-02 balance Assets:Cash -10.00 USD
"#;

    fn position(registry: &Registry, account: &str, commodity: &str) -> Position {
        Position::new(
            registry.lookup_account(account).unwrap(),
            registry.lookup_commodity(commodity).unwrap(),
        )
    }

    #[test]
    fn test_balances() -> anyhow::Result<()> {
        let journal = Journal::from_text(FOOD, "food.journal")?;
        let snapshots = journal.balances(&Config::default())?;

        assert_eq!(snapshots.len(), 1);
        let registry = journal.registry();
        let amounts = &snapshots[0].amounts;
        assert_eq!(amounts.get(&position(registry, "Assets:Cash", "USD")), dec!(-10.00));
        assert_eq!(amounts.get(&position(registry, "Expenses:Food", "USD")), dec!(10.00));
        assert!(snapshots[0].valuation.is_none());
        Ok(())
    }

    #[test]
    fn test_failing_assertion_aborts_batch() -> anyhow::Result<()> {
        let text = FOOD.replace("-10.00 USD", "-5.00 USD");
        let journal = Journal::from_text(&text, "food.journal")?;
        let err = journal.balances(&Config::default()).unwrap_err();
        assert_eq!(
            format!("{}", err),
            "food.journal:8: 2023-01-02: balance of `Assets:Cash' in USD is -10.00, expected -5.00"
        );
        Ok(())
    }

    #[test]
    fn test_valuation_through_composed_rates() -> anyhow::Result<()> {
        let journal = Journal::from_text(
            r#"
2023-01-01 price USD 0.9 EUR
2023-01-01 price EUR 0.95 CHF
2023-01-01 open Assets:Cash
2023-01-01 "Deposit"
  Equity:Opening Assets:Cash 100 USD
"#,
            "main.journal",
        )?;
        let config = Config::new().with_valuation("CHF");
        let snapshots = journal.balances(&config)?;

        let values = snapshots[0].valuation.as_ref().unwrap();
        let cash = position(journal.registry(), "Assets:Cash", "USD");
        assert_eq!(values.get(&cash), dec!(85.5));
        Ok(())
    }

    #[test]
    fn test_options_configure_the_run() -> anyhow::Result<()> {
        let journal = Journal::from_text(
            "option \"interval\" \"monthly\"\noption \"diff\" \"true\"\noption \"author\" \"me\"\n",
            "main.journal",
        )?;
        let config = journal.config()?;
        assert_eq!(config.interval, Interval::Monthly);
        assert!(config.diff);
        Ok(())
    }

    const SALARY: &str = r#"
2023-01-01 open Assets:Bank
2023-01-01 open Income:Salary

2023-01-25 "Salary"
  Income:Salary Assets:Bank 1000 CHF

2023-02-25 "Salary"
  Income:Salary Assets:Bank 1000 CHF

2023-03-25 "Salary"
  Income:Salary Assets:Bank 1100 CHF
"#;

    #[test]
    fn test_monthly_diffs() -> anyhow::Result<()> {
        let journal = Journal::from_text(SALARY, "main.journal")?;
        let registry = journal.registry();
        let bank = position(registry, "Assets:Bank", "CHF");

        let config = Config::new()
            .with_interval(Interval::Monthly)
            .with_from(date(2023, 1, 1))
            .with_to(date(2023, 4, 1));
        let cumulative = journal.balances(&config)?;
        let diffs = journal.balances(&config.clone().with_diff(true))?;

        assert_eq!(cumulative.len(), 3);
        assert_eq!(diffs.len(), 2);
        let changes: Vec<_> = diffs.iter().map(|s| s.amounts.get(&bank)).collect();
        assert_eq!(changes, vec![dec!(1000), dec!(1100)]);
        assert_eq!(cumulative[2].amounts.get(&bank), dec!(3100));
        Ok(())
    }

    #[test]
    fn test_filters() -> anyhow::Result<()> {
        let journal = Journal::from_text(SALARY, "main.journal")?;
        let config = Config::new().with_accounts("^Assets")?.with_commodities("USD")?;
        let snapshots = journal.balances(&config)?;
        assert!(snapshots[0].amounts.is_zero());
        Ok(())
    }

    fn named(registry: &Registry, amounts: &crate::amounts::Amounts) -> Vec<(String, String, rust_decimal::Decimal)> {
        let mut named: Vec<_> = amounts
            .iter()
            .map(|(p, q)| (registry.account_name(p.account), registry.commodity_name(p.commodity), *q))
            .collect();
        named.sort();
        named
    }

    fn write_journal(dir: &Path, text: &str) -> anyhow::Result<PathBuf> {
        let path = dir.join("main.journal");
        fs::write(&path, text)?;
        Ok(path)
    }

    #[tokio::test]
    async fn test_pipeline_matches_batch() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("salary.journal"), SALARY)?;
        let path = write_journal(
            dir.path(),
            "include \"salary.journal\"\n2023-01-01 price CHF 1.1 USD\n2023-03-01 price CHF 1.2 USD\n",
        )?;

        let config = Config::new()
            .with_interval(Interval::Monthly)
            .with_valuation("USD")
            .with_capacity(1);
        let journal = Journal::load(&path)?;
        let batch = journal.balances(&config)?;

        let token = CancellationToken::new();
        let pipeline = Pipeline::new(config)?;
        let streamed = pipeline.run(&path, &token).await.into_result()?;

        // the registries intern names in a different order
        assert_eq!(streamed.len(), 3);
        assert_eq!(streamed.len(), batch.len());
        for (s, b) in streamed.iter().zip(&batch) {
            assert_eq!(s.period, b.period);
            assert_eq!(named(pipeline.registry(), &s.amounts), named(journal.registry(), &b.amounts));
            assert_eq!(
                named(pipeline.registry(), s.valuation.as_ref().unwrap()),
                named(journal.registry(), b.valuation.as_ref().unwrap())
            );
        }
        let bank = named(pipeline.registry(), streamed[2].valuation.as_ref().unwrap());
        assert!(bank.contains(&("Assets:Bank".into(), "CHF".into(), dec!(3720.0))));
        Ok(())
    }

    #[tokio::test]
    async fn test_pipeline_collects_all_errors() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_journal(
            dir.path(),
            r#"
2023-01-01 open Assets:Cash
2023-01-02 balance Assets:Cash 1 USD
2023-01-03 close Expenses:Food
2023-01-04 "Lunch"
  Assets:Cash Expenses:Food 5 USD
2023-01-05 balance Assets:Cash 0 USD
"#,
        )?;

        let token = CancellationToken::new();
        let outcome = Pipeline::new(Config::default())?.run(&path, &token).await;
        match outcome {
            Outcome::Failed { partial, errors } => {
                assert_eq!(partial.len(), 1);
                let mut lines: Vec<_> = errors.iter().map(|e| e.to_string()).collect();
                lines.sort();
                assert_eq!(lines.len(), 3);
                assert!(lines[0].ends_with("main.journal:3: 2023-01-02: balance of `Assets:Cash' in USD is 0, expected 1"));
                assert!(lines[1].ends_with("main.journal:4: 2023-01-03: account `Expenses:Food' is not open"));
                assert!(lines[2].ends_with("main.journal:5: 2023-01-04: account `Expenses:Food' is not open"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_pipeline_reports_syntax_errors() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_journal(dir.path(), "2023-01-01 open Assets:Cash\n2023-01-02 frobnicate\n")?;

        let token = CancellationToken::new();
        let err = Pipeline::new(Config::default())?
            .run(&path, &token)
            .await
            .into_result()
            .unwrap_err();
        match err {
            RunError::Failed(errors) => {
                assert_eq!(errors.len(), 1);
                assert!(matches!(errors[0], Error::UnknownDirective { .. }));
            }
            other => panic!("unexpected error {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_pipeline_cancellation() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_journal(dir.path(), SALARY)?;

        let token = CancellationToken::new();
        token.cancel();
        let outcome = Pipeline::new(Config::default())?.run(&path, &token).await;
        assert!(outcome.is_cancelled());
        Ok(())
    }

    #[tokio::test]
    async fn test_pipeline_cancellation_mid_run() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut text = String::from("2023-01-01 open Assets:Bank\n2023-01-01 open Income:Salary\n");
        let mut day = date(2023, 1, 1);
        for _ in 0..3000 {
            day = day.succ_opt().unwrap();
            text.push_str(&format!("{} \"Salary\"\n  Income:Salary Assets:Bank 10 CHF\n", day));
        }
        let path = write_journal(dir.path(), &text)?;

        let token = CancellationToken::new();
        let pipeline = Pipeline::new(Config::new().with_capacity(1).with_interval(Interval::Daily))?;
        let canceller = {
            let token = token.clone();
            let registry = Arc::clone(pipeline.registry());
            tokio::spawn(async move {
                // salary postings are interned once the parser is under way
                while registry.lookup_account("Income:Salary").is_none() {
                    tokio::task::yield_now().await;
                }
                for _ in 0..100 {
                    tokio::task::yield_now().await;
                }
                token.cancel();
            })
        };

        let outcome = pipeline.run(&path, &token).await;
        canceller.await?;
        assert!(outcome.is_cancelled());

        // every stage task ends and drops its handle on the registry
        for _ in 0..10_000 {
            if Arc::strong_count(pipeline.registry()) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(Arc::strong_count(pipeline.registry()), 1);
        Ok(())
    }

    const HUGE_RATES: &str = r#"
2023-01-01 price AAA 1000000000000000 BBB
2023-01-01 price BBB 1000000000000000 CCC
2023-01-01 price CCC 1000000000000000 CHF
2023-01-01 open Assets:Cash
2023-01-02 "Deposit"
  Equity:Opening Assets:Cash 10 CHF
"#;

    #[test]
    fn test_overflowing_prices_fail_the_batch() -> anyhow::Result<()> {
        let journal = Journal::from_text(HUGE_RATES, "main.journal")?;
        let err = journal.balances(&Config::new().with_valuation("CHF")).unwrap_err();
        assert_eq!(format!("{}", err), "2023-01-01: arithmetic overflow in BBB");
        Ok(())
    }

    #[tokio::test]
    async fn test_overflowing_prices_fail_the_pipeline() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_journal(dir.path(), HUGE_RATES)?;

        let token = CancellationToken::new();
        let pipeline = Pipeline::new(Config::new().with_valuation("CHF"))?;
        match pipeline.run(&path, &token).await {
            Outcome::Failed { partial, errors } => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].to_string(), "2023-01-01: arithmetic overflow in BBB");
                let values = named(pipeline.registry(), partial[0].valuation.as_ref().unwrap());
                assert!(values.contains(&("Assets:Cash".into(), "CHF".into(), dec!(10))));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_rejected_transactions_are_not_valuated() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_journal(
            dir.path(),
            r#"
2023-01-01 price USD 0.9 CHF
2023-01-01 open Assets:Cash
2023-01-02 "Lunch"
  Assets:Cash Expenses:Food 5 USD
"#,
        )?;

        let token = CancellationToken::new();
        let pipeline = Pipeline::new(Config::new().with_valuation("CHF"))?;
        match pipeline.run(&path, &token).await {
            Outcome::Failed { partial, errors } => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].to_string().ends_with("account `Expenses:Food' is not open"));
                let snapshot = &partial[0];
                assert!(snapshot.amounts.is_zero());
                assert!(snapshot.valuation.as_ref().unwrap().is_zero());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_pipeline_rejects_bad_config() {
        assert!(Pipeline::new(Config::new().with_capacity(0)).is_err());
        assert!(Pipeline::new(Config::new().with_valuation_account("Valuation")).is_err());
    }
}
