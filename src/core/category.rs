use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Security,
    #[serde(rename = "Cost Optimization")]
    CostOptimization,
    Compliance,
    #[serde(rename = "Operational Excellence")]
    OperationalExcellence,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Security,
        Category::CostOptimization,
        Category::Compliance,
        Category::OperationalExcellence,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Security => "Security",
            Category::CostOptimization => "Cost Optimization",
            Category::Compliance => "Compliance",
            Category::OperationalExcellence => "Operational Excellence",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "security" => Ok(Category::Security),
            "costoptimization" | "cost" => Ok(Category::CostOptimization),
            "compliance" => Ok(Category::Compliance),
            "operationalexcellence" | "ops" | "risk" | "riskscoring" => {
                Ok(Category::OperationalExcellence)
            }
            _ => Err(format!(
                "invalid category: {} (expected Security|Cost Optimization|Compliance|Operational Excellence)",
                s.trim()
            )),
        }
    }
}

/// Ordered, de-duplicated set of requested analysis modes. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnalysisModes(Vec<Category>);

impl AnalysisModes {
    pub fn new(modes: impl IntoIterator<Item = Category>) -> Self {
        let mut modes: Vec<Category> = modes.into_iter().collect();
        modes.sort();
        modes.dedup();
        if modes.is_empty() {
            return Self::default();
        }
        Self(modes)
    }

    pub fn parse_list(values: &[String]) -> Result<Self, String> {
        let modes = values
            .iter()
            .map(|v| v.parse::<Category>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(modes))
    }

    pub fn categories(&self) -> &[Category] {
        &self.0
    }

    pub fn contains(&self, category: Category) -> bool {
        self.0.contains(&category)
    }

    pub fn digest(&self) -> String {
        self.0
            .iter()
            .map(|c| match c {
                Category::Security => "sec",
                Category::CostOptimization => "cost",
                Category::Compliance => "comp",
                Category::OperationalExcellence => "ops",
            })
            .collect::<Vec<_>>()
            .join("+")
    }
}

impl Default for AnalysisModes {
    fn default() -> Self {
        Self(Category::ALL.to_vec())
    }
}
