// ==========================================
// 承包商派单引擎 - 领域类型定义
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 工单优先级 (Job Priority)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPriority {
    Emergency, // 紧急上门
    Scheduled, // 预约
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPriority::Emergency => write!(f, "EMERGENCY"),
            JobPriority::Scheduled => write!(f, "SCHEDULED"),
        }
    }
}

impl JobPriority {
    /// 从字符串解析优先级
    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "EMERGENCY" => JobPriority::Emergency,
            _ => JobPriority::Scheduled,
        }
    }
}

// ==========================================
// 工单状态 (Job Status)
// ==========================================
// 红线: 只能通过 can_transition_to 定义的状态机迁移
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    New,          // 新建
    Scoring,      // 评分中
    Offering,     // 派单中(有一个未决报价)
    Assigned,     // 已指派
    Unassignable, // 无法指派
    Cancelled,    // 已取消
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "NEW",
            JobStatus::Scoring => "SCORING",
            JobStatus::Offering => "OFFERING",
            JobStatus::Assigned => "ASSIGNED",
            JobStatus::Unassignable => "UNASSIGNABLE",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// 从字符串解析状态
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NEW" => Some(JobStatus::New),
            "SCORING" => Some(JobStatus::Scoring),
            "OFFERING" => Some(JobStatus::Offering),
            "ASSIGNED" => Some(JobStatus::Assigned),
            "UNASSIGNABLE" => Some(JobStatus::Unassignable),
            "CANCELLED" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// 是否终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Assigned | JobStatus::Unassignable | JobStatus::Cancelled
        )
    }

    /// 派单状态机
    ///
    /// - NEW → SCORING
    /// - SCORING → OFFERING / ASSIGNED(兜底) / UNASSIGNABLE
    /// - OFFERING → OFFERING(n+1) / ASSIGNED(接受或兜底) / UNASSIGNABLE
    /// - 任意非终态 → CANCELLED
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        if next == Cancelled {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (New, Scoring)
                | (Scoring, Offering)
                | (Scoring, Assigned)
                | (Scoring, Unassignable)
                | (Offering, Offering)
                | (Offering, Assigned)
                | (Offering, Unassignable)
        )
    }

    /// 人工干预可重新打开的状态 (改派 / 立即智能派单)
    pub fn can_reopen(&self) -> bool {
        matches!(self, JobStatus::Assigned | JobStatus::Unassignable)
    }
}

// ==========================================
// 承包商可用状态 (Availability)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability {
    Available, // 空闲
    Busy,      // 忙碌(可能仍有余量)
    Offline,   // 离线
    OnJob,     // 作业中
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Available => "AVAILABLE",
            Availability::Busy => "BUSY",
            Availability::Offline => "OFFLINE",
            Availability::OnJob => "ON_JOB",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "AVAILABLE" => Availability::Available,
            "BUSY" => Availability::Busy,
            "ON_JOB" => Availability::OnJob,
            _ => Availability::Offline,
        }
    }
}

// ==========================================
// 专业匹配度 (Specialization Match)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpecializationMatch {
    None,    // 不匹配
    General, // 通用服务兜底
    Related, // 通用服务 + 同类技能
    Exact,   // 精确匹配
}

impl SpecializationMatch {
    /// 是否满足候选准入
    pub fn is_compatible(&self) -> bool {
        !matches!(self, SpecializationMatch::None)
    }
}

// ==========================================
// 评分记录结果 (Score Outcome)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreOutcome {
    Pending,    // 待定
    Offered,    // 已报价
    Accepted,   // 已接受
    Declined,   // 已拒绝
    Timeout,    // 超时
    NotOffered, // 未报价
}

impl fmt::Display for ScoreOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ScoreOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreOutcome::Pending => "PENDING",
            ScoreOutcome::Offered => "OFFERED",
            ScoreOutcome::Accepted => "ACCEPTED",
            ScoreOutcome::Declined => "DECLINED",
            ScoreOutcome::Timeout => "TIMEOUT",
            ScoreOutcome::NotOffered => "NOT_OFFERED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "OFFERED" => ScoreOutcome::Offered,
            "ACCEPTED" => ScoreOutcome::Accepted,
            "DECLINED" => ScoreOutcome::Declined,
            "TIMEOUT" => ScoreOutcome::Timeout,
            "NOT_OFFERED" => ScoreOutcome::NotOffered,
            _ => ScoreOutcome::Pending,
        }
    }
}

// ==========================================
// 派单尝试结果 (Attempt Outcome)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    Pending,   // 报价未决
    Accepted,  // 接受
    Declined,  // 拒绝(含投递失败的隐式拒绝)
    Timeout,   // 超时
    Withdrawn, // 工单取消后撤回
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Pending => "PENDING",
            AttemptOutcome::Accepted => "ACCEPTED",
            AttemptOutcome::Declined => "DECLINED",
            AttemptOutcome::Timeout => "TIMEOUT",
            AttemptOutcome::Withdrawn => "WITHDRAWN",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "ACCEPTED" => AttemptOutcome::Accepted,
            "DECLINED" => AttemptOutcome::Declined,
            "TIMEOUT" => AttemptOutcome::Timeout,
            "WITHDRAWN" => AttemptOutcome::Withdrawn,
            _ => AttemptOutcome::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptOutcome::Pending)
    }

    /// 对应的评分记录结果
    pub fn to_score_outcome(&self) -> ScoreOutcome {
        match self {
            AttemptOutcome::Pending => ScoreOutcome::Offered,
            AttemptOutcome::Accepted => ScoreOutcome::Accepted,
            AttemptOutcome::Declined => ScoreOutcome::Declined,
            AttemptOutcome::Timeout => ScoreOutcome::Timeout,
            AttemptOutcome::Withdrawn => ScoreOutcome::NotOffered,
        }
    }
}

// ==========================================
// 指派方式 (Assignment Method)
// ==========================================
// 兜底与人工指派在效果统计中单独计数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentMethod {
    Progressive, // 评分渐进派单
    Fallback,    // 兜底轮询
    Manual,      // 人工指定
}

impl fmt::Display for AssignmentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl AssignmentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentMethod::Progressive => "PROGRESSIVE",
            AssignmentMethod::Fallback => "FALLBACK",
            AssignmentMethod::Manual => "MANUAL",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "FALLBACK" => AssignmentMethod::Fallback,
            "MANUAL" => AssignmentMethod::Manual,
            _ => AssignmentMethod::Progressive,
        }
    }
}

// ==========================================
// 统计周期 (Effectiveness Period)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodKind {
    Day,
    Week,
    Month,
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl PeriodKind {
    pub const ALL: [PeriodKind; 3] = [PeriodKind::Day, PeriodKind::Week, PeriodKind::Month];

    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Day => "DAY",
            PeriodKind::Week => "WEEK",
            PeriodKind::Month => "MONTH",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DAY" => Some(PeriodKind::Day),
            "WEEK" => Some(PeriodKind::Week),
            "MONTH" => Some(PeriodKind::Month),
            _ => None,
        }
    }
}

// ==========================================
// 权重提案状态 (Proposal Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    Proposed,
    Activated,
    Rejected,
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Proposed => "PROPOSED",
            ProposalStatus::Activated => "ACTIVATED",
            ProposalStatus::Rejected => "REJECTED",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "ACTIVATED" => ProposalStatus::Activated,
            "REJECTED" => ProposalStatus::Rejected,
            _ => ProposalStatus::Proposed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_transitions() {
        assert!(JobStatus::New.can_transition_to(JobStatus::Scoring));
        assert!(JobStatus::Scoring.can_transition_to(JobStatus::Offering));
        assert!(JobStatus::Offering.can_transition_to(JobStatus::Offering));
        assert!(JobStatus::Offering.can_transition_to(JobStatus::Assigned));
        assert!(JobStatus::Scoring.can_transition_to(JobStatus::Unassignable));

        // 不能跳过评分
        assert!(!JobStatus::New.can_transition_to(JobStatus::Offering));
        assert!(!JobStatus::New.can_transition_to(JobStatus::Assigned));
        // 终态不可再迁移
        assert!(!JobStatus::Assigned.can_transition_to(JobStatus::Offering));
        assert!(!JobStatus::Unassignable.can_transition_to(JobStatus::Scoring));
    }

    #[test]
    fn test_cancel_only_from_non_terminal() {
        for status in [JobStatus::New, JobStatus::Scoring, JobStatus::Offering] {
            assert!(status.can_transition_to(JobStatus::Cancelled), "{}", status);
        }
        for status in [JobStatus::Assigned, JobStatus::Unassignable, JobStatus::Cancelled] {
            assert!(!status.can_transition_to(JobStatus::Cancelled), "{}", status);
        }
    }

    #[test]
    fn test_status_round_trip_strings() {
        assert_eq!(JobStatus::from_str("offering"), Some(JobStatus::Offering));
        assert_eq!(JobStatus::from_str("bogus"), None);
        assert_eq!(Availability::from_str("ON_JOB"), Availability::OnJob);
        assert_eq!(AttemptOutcome::from_str("TIMEOUT"), AttemptOutcome::Timeout);
        assert_eq!(ScoreOutcome::from_str("NOT_OFFERED"), ScoreOutcome::NotOffered);
    }

    #[test]
    fn test_attempt_outcome_maps_to_score_outcome() {
        assert_eq!(AttemptOutcome::Accepted.to_score_outcome(), ScoreOutcome::Accepted);
        assert_eq!(AttemptOutcome::Withdrawn.to_score_outcome(), ScoreOutcome::NotOffered);
        assert!(!AttemptOutcome::Pending.is_terminal());
    }
}
