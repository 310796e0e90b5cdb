pub mod catalog;
pub mod credential;
pub mod envelope;
pub mod grading;
pub mod report;
pub mod submission;
pub mod wire;

pub use catalog::{
    Assignment, AssignmentState, CatalogListing, Course, CourseState, EnrollmentRole, Page,
    PageCursor,
};
pub use credential::{Credential, ProviderKind, Session};
pub use envelope::{ApiEnvelope, ApiFailure};
pub use grading::{
    GradeRequest, GradingJob, JobHandle, JobProgress, JobStatus, JobStatusReport, ProgressPhase,
    ProgressSnapshot,
};
pub use report::{
    CriterionScore, GradeScale, GradingResult, LetterGrade, RawCriterion, RawGradingResult,
    Report, ResultStatus, SummaryStats,
};
pub use submission::{
    DownloadReceipt, DownloadRequest, RemoteSubmission, SubmissionRecord, SyncStatus, SyncSummary,
};
