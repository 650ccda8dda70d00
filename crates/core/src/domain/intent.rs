use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Resume,
    Interview,
    Jobs,
    Knowledge,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 5] =
        [Intent::Resume, Intent::Interview, Intent::Jobs, Intent::Knowledge, Intent::Unknown];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resume => "resume",
            Self::Interview => "interview",
            Self::Jobs => "jobs",
            Self::Knowledge => "knowledge",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "resume" => Some(Self::Resume),
            "interview" => Some(Self::Interview),
            "jobs" => Some(Self::Jobs),
            "knowledge" => Some(Self::Knowledge),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Fine-grained label produced by a classifier. Each label folds into exactly
/// one [`Intent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    ResumeAnalysis,
    ResumeImprovement,
    InterviewStart,
    InterviewPractice,
    InterviewAnswer,
    JobSearch,
    ApplicationTracking,
    CareerAdvice,
    Unknown,
}

impl IntentLabel {
    pub fn intent(&self) -> Intent {
        match self {
            Self::ResumeAnalysis | Self::ResumeImprovement => Intent::Resume,
            Self::InterviewStart | Self::InterviewPractice | Self::InterviewAnswer => {
                Intent::Interview
            }
            Self::JobSearch | Self::ApplicationTracking => Intent::Jobs,
            Self::CareerAdvice => Intent::Knowledge,
            Self::Unknown => Intent::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResumeAnalysis => "resume_analysis",
            Self::ResumeImprovement => "resume_improvement",
            Self::InterviewStart => "interview_start",
            Self::InterviewPractice => "interview_practice",
            Self::InterviewAnswer => "interview_answer",
            Self::JobSearch => "job_search",
            Self::ApplicationTracking => "application_tracking",
            Self::CareerAdvice => "career_advice",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "resume_analysis" => Some(Self::ResumeAnalysis),
            "resume_improvement" => Some(Self::ResumeImprovement),
            "interview_start" => Some(Self::InterviewStart),
            "interview_practice" => Some(Self::InterviewPractice),
            "interview_answer" => Some(Self::InterviewAnswer),
            "job_search" => Some(Self::JobSearch),
            "application_tracking" => Some(Self::ApplicationTracking),
            "career_advice" => Some(Self::CareerAdvice),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// One scored candidate returned by a classifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentScore {
    pub label: IntentLabel,
    pub confidence: f64,
    pub reason: String,
}

impl IntentScore {
    pub fn new(label: IntentLabel, confidence: f64, reason: impl Into<String>) -> Self {
        Self { label, confidence: clamp_confidence(confidence), reason: reason.into() }
    }
}

/// The Router's decision for one turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentDecision {
    pub intent: Intent,
    pub label: IntentLabel,
    pub confidence: f64,
    pub rationale: String,
    pub clarification_required: bool,
}

impl IntentDecision {
    pub fn unknown(confidence: f64, rationale: impl Into<String>) -> Self {
        Self {
            intent: Intent::Unknown,
            label: IntentLabel::Unknown,
            confidence: clamp_confidence(confidence),
            rationale: rationale.into(),
            clarification_required: true,
        }
    }
}

pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::{clamp_confidence, Intent, IntentLabel};

    #[test]
    fn every_label_folds_into_the_closed_intent_set() {
        let labels = [
            IntentLabel::ResumeAnalysis,
            IntentLabel::ResumeImprovement,
            IntentLabel::InterviewStart,
            IntentLabel::InterviewPractice,
            IntentLabel::InterviewAnswer,
            IntentLabel::JobSearch,
            IntentLabel::ApplicationTracking,
            IntentLabel::CareerAdvice,
            IntentLabel::Unknown,
        ];

        for label in labels {
            assert!(Intent::ALL.contains(&label.intent()));
            assert_eq!(IntentLabel::parse(label.as_str()), Some(label));
        }
        assert_eq!(IntentLabel::ApplicationTracking.intent(), Intent::Jobs);
        assert_eq!(IntentLabel::CareerAdvice.intent(), Intent::Knowledge);
    }

    #[test]
    fn confidence_is_clamped_into_unit_interval() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }
}
