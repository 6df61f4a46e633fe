pub mod analysis;
pub mod chart;
pub mod narrative;
pub mod row;

pub use analysis::{AnalysisRecord, AnalysisRequest, AnalysisResponse, GeneratedQuery, TenantId};
pub use chart::{ChartKind, ChartSpec};
pub use narrative::{InsightNarrative, NarrativeSection, SECTION_LABELS};
pub use row::{ResultSet, Row, Scalar};
