// ==========================================
// 承包商派单引擎 - 多因子评分
// ==========================================
// 纯函数: (候选属性, 配置) → 因子得分 / 综合分
// 综合分 = Σ weight[f] × score[f] / 100, 落在 [0, 100]
// 排序: 综合分降序 → 距离升序 → 承包商ID升序
// 缺失属性取中性值 50
// ==========================================

use crate::config::AssignmentConfig;
use crate::domain::job::Job;
use crate::domain::score::{AssignmentScore, FactorScores, FactorWeights};
use crate::domain::types::{Availability, JobPriority, ScoreOutcome, SpecializationMatch};
use crate::domain::DispatchRun;
use crate::engine::candidate::Candidate;
use chrono::Utc;
use std::cmp::Ordering;
use uuid::Uuid;

/// 缺失属性的中性得分
pub const NEUTRAL_SCORE: f64 = 50.0;

/// 忙碌状态的可用性折扣
const BUSY_DISCOUNT: f64 = 0.8;

/// 经验饱和常数 (完工数达到该值时约 63 分)
const EXPERIENCE_SCALE: f64 = 25.0;

/// 老客户加分: 每单 10 分, 最多 20 分
const PRIOR_CUSTOMER_BONUS_PER_JOB: f64 = 10.0;
const PRIOR_CUSTOMER_BONUS_CAP: f64 = 20.0;

/// 高于门槛该分值视为强匹配
const STRONG_MATCH_MARGIN: f64 = 20.0;

// ==========================================
// Scorer - 候选评分器
// ==========================================
#[derive(Debug, Clone, Copy, Default)]
pub struct Scorer;

impl Scorer {
    pub fn new() -> Self {
        Self
    }

    /// 对一次运行的全部候选评分并排名
    ///
    /// # 参数
    /// - job: 工单
    /// - run: 评分运行 (携带配置快照)
    /// - candidates: 候选集合
    ///
    /// # 返回
    /// 按名次排列的评分记录 (rank 从 1 起, outcome = PENDING)
    pub fn rank(&self, job: &Job, run: &DispatchRun, candidates: &[Candidate]) -> Vec<AssignmentScore> {
        let config = &run.config;
        let computed_at = Utc::now();

        let mut scored: Vec<(&Candidate, FactorScores, f64)> = candidates
            .iter()
            .map(|c| {
                let factors = self.factor_scores(job, c, config);
                let composite = composite_score(&config.weights, &factors);
                (c, factors, composite)
            })
            .collect();

        scored.sort_by(|a, b| compare_ranked(a.2, a.0, b.2, b.0));

        scored
            .into_iter()
            .enumerate()
            .map(|(i, (candidate, factors, composite))| AssignmentScore {
                score_id: Uuid::new_v4().to_string(),
                run_id: run.run_id.clone(),
                job_id: job.job_id.clone(),
                contractor_id: candidate.contractor.contractor_id.clone(),
                rank: i as i32 + 1,
                distance_miles: candidate.distance_miles,
                factor_scores: factors,
                composite_score: composite,
                recommendation: recommendation(composite, config.min_score_threshold, &factors),
                outcome: ScoreOutcome::Pending,
                config_version: run.config_version(),
                computed_at,
            })
            .collect()
    }

    /// 计算单个候选的 8 项因子得分
    pub fn factor_scores(&self, job: &Job, candidate: &Candidate, config: &AssignmentConfig) -> FactorScores {
        let c = &candidate.contractor;
        FactorScores {
            proximity: proximity_score(candidate.distance_miles, config.max_search_radius_miles),
            availability: availability_score(c.availability, c.current_workload, c.workload_ratio()),
            rating: rating_score(c.rating),
            specialization: specialization_score(candidate.specialization),
            performance: performance_score(c.history.completion_rate(), c.history.on_time_rate()),
            workload: workload_score(c.current_workload),
            preference: preference_score(job, candidate),
            experience: experience_score(c.completed_jobs),
        }
    }
}

// ==========================================
// 因子归一化
// ==========================================

pub fn proximity_score(distance_miles: f64, max_radius_miles: f64) -> f64 {
    if max_radius_miles <= 0.0 {
        return 0.0;
    }
    100.0 * (1.0 - distance_miles / max_radius_miles).max(0.0)
}

pub fn availability_score(availability: Availability, workload: i32, workload_ratio: f64) -> f64 {
    match availability {
        Availability::Available if workload <= 0 => 100.0,
        Availability::Available => 100.0 * (1.0 - workload_ratio),
        Availability::Busy => 100.0 * (1.0 - workload_ratio) * BUSY_DISCOUNT,
        Availability::Offline | Availability::OnJob => 0.0,
    }
}

pub fn rating_score(rating: Option<f64>) -> f64 {
    match rating {
        Some(r) if r.is_finite() => (r / 5.0 * 100.0).clamp(0.0, 100.0),
        _ => NEUTRAL_SCORE,
    }
}

pub fn specialization_score(m: SpecializationMatch) -> f64 {
    match m {
        SpecializationMatch::Exact => 100.0,
        SpecializationMatch::Related => 60.0,
        SpecializationMatch::General => 40.0,
        SpecializationMatch::None => 0.0,
    }
}

/// 完工率占 60%, 准时率占 40%; 无历史按 0.5 计
pub fn performance_score(completion_rate: Option<f64>, on_time_rate: Option<f64>) -> f64 {
    let completion = completion_rate.unwrap_or(0.5);
    let on_time = on_time_rate.unwrap_or(0.5);
    (100.0 * (0.6 * completion + 0.4 * on_time)).clamp(0.0, 100.0)
}

pub fn workload_score(workload: i32) -> f64 {
    100.0 / (1.0 + workload.max(0) as f64)
}

/// 偏好匹配
///
/// 已声明的偏好项各记 0 或 100 取均值, 未声明任何偏好为 50;
/// 曾服务同一客户另加分 (封顶)
pub fn preference_score(job: &Job, candidate: &Candidate) -> f64 {
    let prefs = &candidate.contractor.preferences;
    let mut components: Vec<f64> = Vec::with_capacity(3);

    if !prefs.preferred_service_types.is_empty() {
        let hit = prefs
            .preferred_service_types
            .iter()
            .any(|s| s == &job.service_type || s == job.service_category());
        components.push(if hit { 100.0 } else { 0.0 });
    }

    if let Some(max_travel) = prefs.max_travel_miles {
        components.push(if candidate.distance_miles <= max_travel { 100.0 } else { 0.0 });
    }

    if !prefs.accepts_emergency {
        components.push(match job.priority {
            JobPriority::Scheduled => 100.0,
            JobPriority::Emergency => 0.0,
        });
    }

    let base = if components.is_empty() {
        NEUTRAL_SCORE
    } else {
        components.iter().sum::<f64>() / components.len() as f64
    };

    let bonus = (candidate.prior_customer_jobs.max(0) as f64 * PRIOR_CUSTOMER_BONUS_PER_JOB)
        .min(PRIOR_CUSTOMER_BONUS_CAP);

    (base + bonus).min(100.0)
}

/// 边际递减: 100 × (1 - e^(-n/25))
pub fn experience_score(completed_jobs: i64) -> f64 {
    let n = completed_jobs.max(0) as f64;
    (100.0 * (1.0 - (-n / EXPERIENCE_SCALE).exp())).clamp(0.0, 100.0)
}

/// 加权综合分, 截断到 [0, 100]
pub fn composite_score(weights: &FactorWeights, scores: &FactorScores) -> f64 {
    let total: f64 = weights
        .iter()
        .map(|(factor, w)| w * scores.get(factor) / 100.0)
        .sum();
    if total.is_finite() {
        total.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn compare_ranked(a_score: f64, a: &Candidate, b_score: f64, b: &Candidate) -> Ordering {
    b_score
        .total_cmp(&a_score)
        .then_with(|| a.distance_miles.total_cmp(&b.distance_miles))
        .then_with(|| a.contractor.contractor_id.cmp(&b.contractor.contractor_id))
}

// ==========================================
// 推荐说明
// ==========================================

fn recommendation(composite: f64, threshold: f64, factors: &FactorScores) -> String {
    let band = if composite >= threshold + STRONG_MATCH_MARGIN {
        "STRONG_MATCH"
    } else if composite >= threshold {
        "GOOD_MATCH"
    } else if composite >= threshold / 2.0 {
        "WEAK_MATCH"
    } else {
        "BELOW_THRESHOLD"
    };

    let mut ranked: Vec<_> = factors.iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    let strongest = ranked.first();
    let weakest = ranked.last();

    match (strongest, weakest) {
        (Some((top, top_v)), Some((low, low_v))) => format!(
            "{}: 综合分 {:.1} (门槛 {:.1}), 优势 {}={:.0}, 短板 {}={:.0}",
            band, composite, threshold, top, top_v, low, low_v
        ),
        _ => format!("{}: 综合分 {:.1} (门槛 {:.1})", band, composite, threshold),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::contractor::{Contractor, OfferHistory};
    use crate::domain::job::GeoPoint;
    use crate::domain::score::Factor;

    fn job() -> Job {
        Job::new("J1", "plumbing.drain", GeoPoint::new(0.0, 0.0), JobPriority::Scheduled)
    }

    fn candidate(id: &str, distance: f64) -> Candidate {
        let mut c = Contractor::new(id, GeoPoint::new(0.0, 0.0));
        c.specializations.insert("plumbing.drain".to_string());
        c.rating = Some(4.0);
        c.completed_jobs = 25;
        Candidate {
            contractor: c,
            distance_miles: distance,
            specialization: SpecializationMatch::Exact,
            prior_customer_jobs: 0,
        }
    }

    #[test]
    fn test_factor_normalization() {
        assert_eq!(proximity_score(0.0, 100.0), 100.0);
        assert_eq!(proximity_score(50.0, 100.0), 50.0);
        assert_eq!(proximity_score(150.0, 100.0), 0.0);

        assert_eq!(availability_score(Availability::Available, 0, 0.0), 100.0);
        assert_eq!(availability_score(Availability::Available, 1, 0.5), 50.0);
        assert_eq!(availability_score(Availability::Busy, 1, 0.5), 40.0);

        assert_eq!(rating_score(Some(5.0)), 100.0);
        assert_eq!(rating_score(None), NEUTRAL_SCORE);

        assert_eq!(workload_score(0), 100.0);
        assert_eq!(workload_score(1), 50.0);

        assert_eq!(experience_score(0), 0.0);
        assert!(experience_score(1000) <= 100.0);
        assert!(experience_score(50) > experience_score(25));
    }

    #[test]
    fn test_missing_attributes_are_neutral() {
        assert_eq!(performance_score(None, None), NEUTRAL_SCORE);
        let c = candidate("C1", 5.0);
        assert_eq!(preference_score(&job(), &c), NEUTRAL_SCORE);
    }

    #[test]
    fn test_preference_components_and_bonus() {
        let mut c = candidate("C1", 30.0);
        c.contractor.preferences.preferred_service_types = vec!["plumbing".to_string()];
        c.contractor.preferences.max_travel_miles = Some(20.0);
        // 类别命中 100, 超出距离 0
        assert_eq!(preference_score(&job(), &c), 50.0);

        c.prior_customer_jobs = 5;
        assert_eq!(preference_score(&job(), &c), 70.0);

        let mut emergency = job();
        emergency.priority = JobPriority::Emergency;
        let mut picky = candidate("C2", 5.0);
        picky.contractor.preferences.accepts_emergency = false;
        assert_eq!(preference_score(&emergency, &picky), 0.0);
        assert_eq!(preference_score(&job(), &picky), 100.0);
    }

    #[test]
    fn test_composite_is_weighted_average() {
        let weights = FactorWeights::default_weights();
        let mut scores = FactorScores::default();
        for f in Factor::ALL {
            scores.set(f, 80.0);
        }
        assert!((composite_score(&weights, &scores) - 80.0).abs() < 1e-9);
        assert_eq!(composite_score(&weights, &FactorScores::default()), 0.0);
    }

    #[test]
    fn test_composite_monotonic_in_each_factor() {
        let weights = FactorWeights::default_weights();
        let mut base = FactorScores::default();
        for f in Factor::ALL {
            base.set(f, 50.0);
        }
        let baseline = composite_score(&weights, &base);

        for f in Factor::ALL {
            let mut higher = base;
            higher.set(f, 90.0);
            assert!(composite_score(&weights, &higher) > baseline, "{}", f);

            let mut lower = base;
            lower.set(f, 10.0);
            assert!(composite_score(&weights, &lower) < baseline, "{}", f);
        }
    }

    #[test]
    fn test_rank_orders_by_score_then_distance_then_id() {
        let run = DispatchRun::start("J1", AssignmentConfig::default(), Vec::new());
        let near = candidate("C-near", 2.0);
        let far = candidate("C-far", 20.0);
        let twin_b = candidate("B", 10.0);
        let twin_a = candidate("A", 10.0);

        let scores = Scorer::new().rank(&job(), &run, &[far, twin_b, near, twin_a]);
        let ids: Vec<_> = scores.iter().map(|s| s.contractor_id.as_str()).collect();
        assert_eq!(ids, vec!["C-near", "A", "B", "C-far"]);
        assert_eq!(scores[0].rank, 1);
        assert!(scores.iter().all(|s| s.outcome == ScoreOutcome::Pending));
        assert!(scores.iter().all(|s| (0.0..=100.0).contains(&s.composite_score)));
    }

    #[test]
    fn test_better_history_scores_higher() {
        let config = AssignmentConfig::default();
        let scorer = Scorer::new();
        let novice = candidate("C1", 10.0);
        let mut veteran = candidate("C2", 10.0);
        veteran.contractor.history = OfferHistory {
            jobs_assigned: 10,
            jobs_completed: 10,
            jobs_completed_on_time: 9,
            ..OfferHistory::default()
        };

        let a = composite_score(&config.weights, &scorer.factor_scores(&job(), &novice, &config));
        let b = composite_score(&config.weights, &scorer.factor_scores(&job(), &veteran, &config));
        assert!(b > a);
    }

    #[test]
    fn test_recommendation_bands() {
        let f = FactorScores::default();
        assert!(recommendation(85.0, 60.0, &f).starts_with("STRONG_MATCH"));
        assert!(recommendation(65.0, 60.0, &f).starts_with("GOOD_MATCH"));
        assert!(recommendation(40.0, 60.0, &f).starts_with("WEAK_MATCH"));
        assert!(recommendation(10.0, 60.0, &f).starts_with("BELOW_THRESHOLD"));
    }
}
