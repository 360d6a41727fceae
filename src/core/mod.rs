mod category;
mod finding;
mod report;
mod resource;
mod severity;

pub use category::{AnalysisModes, Category};
pub use finding::{Finding, FindingSource};
pub use report::{AnalysisReport, ReportStatus, ResourceFindings, TokenUsage};
pub use resource::{Resource, Template};
pub use severity::Severity;
