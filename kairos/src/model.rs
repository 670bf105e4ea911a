use chrono::{DateTime, Duration, Local};
use kairos_ipc::{SessionDetail, SessionSummary, WorkPeriodDetail};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One work phase: opened when the countdown starts, closed when it runs
/// out, then handed to the session aggregator by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkPeriod {
    pub id: Uuid,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub input: String,
    pub task_description: String,
    pub break_feedback: String,
    pub ai_response: String,
}

impl Default for WorkPeriod {
    fn default() -> Self {
        Self::open(String::new())
    }
}

impl WorkPeriod {
    pub fn open(task_description: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_time: Local::now(),
            end_time: None,
            input: String::new(),
            task_description,
            break_feedback: String::new(),
            ai_response: String::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn duration(&self) -> Duration {
        match self.end_time {
            Some(end) => (end - self.start_time).max(Duration::zero()),
            None => Duration::zero(),
        }
    }

    pub fn detail(&self) -> WorkPeriodDetail {
        WorkPeriodDetail {
            id: self.id.to_string(),
            started_at: self.start_time,
            ended_at: self.end_time,
            task_description: self.task_description.clone(),
            input: self.input.clone(),
            break_feedback: self.break_feedback.clone(),
            ai_response: self.ai_response.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub work_periods: Vec<WorkPeriod>,
    pub ai_report: String,
    pub export_link: String,
    pub seed_narration: String,
}

impl Default for Session {
    fn default() -> Self {
        Self::start(String::new())
    }
}

impl Session {
    pub fn start(seed_narration: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_time: Local::now(),
            end_time: None,
            work_periods: Vec::new(),
            ai_report: String::new(),
            export_link: String::new(),
            seed_narration,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn total_work_duration(&self) -> Duration {
        self.work_periods
            .iter()
            .fold(Duration::zero(), |acc, wp| acc + wp.duration())
    }

    pub fn work_period_mut(&mut self, id: Uuid) -> Option<&mut WorkPeriod> {
        self.work_periods.iter_mut().find(|wp| wp.id == id)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.to_string(),
            started_at: self.start_time,
            ended_at: self.end_time,
            work_periods: self.work_periods.len(),
            total_work_secs: self.total_work_duration().num_seconds(),
            has_report: !self.ai_report.is_empty(),
            export_link: self.export_link.clone(),
        }
    }

    pub fn detail(&self) -> SessionDetail {
        SessionDetail {
            summary: self.summary(),
            seed_narration: self.seed_narration.clone(),
            ai_report: self.ai_report.clone(),
            periods: self.work_periods.iter().map(WorkPeriod::detail).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_work_period_has_zero_duration() {
        let wp = WorkPeriod::open("draft".into());
        assert!(wp.is_open());
        assert_eq!(wp.duration(), Duration::zero());
    }

    #[test]
    fn duration_is_end_minus_start() {
        let mut wp = WorkPeriod::open(String::new());
        wp.end_time = Some(wp.start_time + Duration::minutes(25));
        assert_eq!(wp.duration(), Duration::minutes(25));
    }

    #[test]
    fn session_totals_sum_completed_periods() {
        let mut session = Session::start("seed".into());
        for minutes in [25, 20] {
            let mut wp = WorkPeriod::open(String::new());
            wp.end_time = Some(wp.start_time + Duration::minutes(minutes));
            session.work_periods.push(wp);
        }
        session.work_periods.push(WorkPeriod::open(String::new()));

        assert_eq!(session.total_work_duration(), Duration::minutes(45));
        assert!(!session.is_completed());
        assert_eq!(session.summary().work_periods, 3);
    }

    #[test]
    fn sessions_decode_with_missing_fields() {
        let json = r#"{
            "id": "6f1e0c6c-7f57-4d0b-9d38-3f1f0a8a9a11",
            "startTime": "2024-03-01T09:00:00+00:00",
            "workPeriods": [{"input": "notes"}]
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert!(session.end_time.is_none());
        assert_eq!(session.work_periods[0].input, "notes");
        assert!(session.ai_report.is_empty());
        assert!(session.seed_narration.is_empty());
    }
}
