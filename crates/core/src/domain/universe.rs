use anyhow::Context;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

const RANK_COLUMN_PREFIX: &str = "rank_on_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub rank: u32,
}

/// The pinned set of tracked coins. Read-only for the whole run.
#[derive(Debug, Clone)]
pub struct Universe {
    pinned_on: NaiveDate,
    coins: Vec<Coin>,
}

impl Universe {
    pub fn new(pinned_on: NaiveDate, mut coins: Vec<Coin>) -> anyhow::Result<Self> {
        anyhow::ensure!(!coins.is_empty(), "universe must contain at least one coin");

        {
            let mut seen = HashSet::new();
            for coin in &coins {
                anyhow::ensure!(!coin.id.trim().is_empty(), "universe coin id must be non-empty");
                anyhow::ensure!(seen.insert(coin.id.as_str()), "duplicate coin id in universe: {}", coin.id);
            }
        }

        coins.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.id.cmp(&b.id)));
        Ok(Self { pinned_on, coins })
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("open universe file failed: {}", path.display()))?;
        Self::from_reader(file).with_context(|| format!("invalid universe file: {}", path.display()))
    }

    /// Expects `id,symbol,name,rank_on_YYYY_MM_DD`; the pin date comes from the rank column name.
    pub fn from_reader<R: Read>(reader: R) -> anyhow::Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr.headers().context("universe csv must have a header row")?.clone();
        let col = |name: &str| -> anyhow::Result<usize> {
            headers
                .iter()
                .position(|h| h == name)
                .with_context(|| format!("universe csv missing required column: {name}"))
        };
        let id_idx = col("id")?;
        let symbol_idx = col("symbol")?;
        let name_idx = col("name")?;

        let (rank_idx, rank_header) = headers
            .iter()
            .enumerate()
            .find(|(_, h)| h.starts_with(RANK_COLUMN_PREFIX))
            .context("universe csv missing rank_on_YYYY_MM_DD column")?;
        let pinned_on = NaiveDate::parse_from_str(&rank_header[RANK_COLUMN_PREFIX.len()..], "%Y_%m_%d")
            .with_context(|| format!("cannot parse pin date from column {rank_header:?}"))?;

        let mut coins = Vec::new();
        for (line, rec) in rdr.records().enumerate() {
            let rec = rec.context("universe csv read record failed")?;
            let field = |idx: usize| rec.get(idx).unwrap_or("").to_string();
            let rank = field(rank_idx)
                .parse::<u32>()
                .with_context(|| format!("invalid rank on data line {}", line + 1))?;
            coins.push(Coin {
                id: field(id_idx),
                symbol: field(symbol_idx),
                name: field(name_idx),
                rank,
            });
        }

        Self::new(pinned_on, coins)
    }

    pub fn pinned_on(&self) -> NaiveDate {
        self.pinned_on
    }

    pub fn coins(&self) -> &[Coin] {
        &self.coins
    }

    pub fn get(&self, id: &str) -> Option<&Coin> {
        self.coins.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    /// Keeps only the listed ids. Unknown ids are an error so a typo never silently narrows a run.
    pub fn restrict_to(&self, ids: &[String]) -> anyhow::Result<Self> {
        for id in ids {
            anyhow::ensure!(self.contains(id), "coin {id:?} is not part of the universe");
        }
        let coins = self
            .coins
            .iter()
            .filter(|c| ids.iter().any(|id| *id == c.id))
            .cloned()
            .collect();
        Self::new(self.pinned_on, coins)
    }
}
