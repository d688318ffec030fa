// ==========================================
// 承包商派单引擎 - 候选生成
// ==========================================
// 准入: (AVAILABLE 或 BUSY 且有容量余量) AND 半径内 AND 专业兼容
// 半径: 初始半径无候选时按系数扩大，封顶后仍无候选 → NoCandidatesAvailable
// 无状态: 每次调用只读目录与位置服务
// ==========================================

use crate::config::AssignmentConfig;
use crate::domain::contractor::Contractor;
use crate::domain::job::Job;
use crate::domain::types::SpecializationMatch;
use crate::engine::collaborators::LocationService;
use crate::engine::error::{DispatchError, DispatchResult};
use crate::engine::repositories::{ContractorDirectory, JobStore};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// 候选承包商及其原始属性
#[derive(Debug, Clone)]
pub struct Candidate {
    pub contractor: Contractor,
    pub distance_miles: f64,
    pub specialization: SpecializationMatch,
    pub prior_customer_jobs: i64,
}

/// 一次候选生成的结果
#[derive(Debug, Clone)]
pub struct CandidateSet {
    pub radius_miles: f64,
    pub candidates: Vec<Candidate>,
}

pub struct CandidateGenerator {
    contractors: Arc<dyn ContractorDirectory>,
    jobs: Arc<dyn JobStore>,
    location: Arc<dyn LocationService>,
}

impl CandidateGenerator {
    pub fn new(
        contractors: Arc<dyn ContractorDirectory>,
        jobs: Arc<dyn JobStore>,
        location: Arc<dyn LocationService>,
    ) -> Self {
        Self {
            contractors,
            jobs,
            location,
        }
    }

    /// 按扩展半径生成候选
    ///
    /// # 返回
    /// - Ok(CandidateSet): 第一个非空半径内的候选
    /// - Err(NoCandidatesAvailable): 扩展到最大半径仍无候选
    #[instrument(skip(self, job, config, excluded), fields(job_id = %job.job_id))]
    pub async fn generate(
        &self,
        job: &Job,
        config: &AssignmentConfig,
        excluded: &HashSet<String>,
    ) -> DispatchResult<CandidateSet> {
        let in_range = self.measure(job, excluded).await?;

        for radius in config.search_radii() {
            let candidates: Vec<Candidate> = in_range
                .iter()
                .filter(|c| c.distance_miles <= radius)
                .cloned()
                .collect();
            if !candidates.is_empty() {
                debug!(radius, count = candidates.len(), "候选生成完成");
                return self.with_customer_history(job, candidates, radius);
            }
            debug!(radius, "当前半径内无候选, 扩大半径");
        }

        Err(DispatchError::NoCandidatesAvailable {
            job_id: job.job_id.clone(),
            radius_miles: config.max_search_radius_miles,
        })
    }

    /// 最大半径内全部准入承包商 (兜底轮询用，不含评分)
    pub async fn eligible_within_max(
        &self,
        job: &Job,
        config: &AssignmentConfig,
        excluded: &HashSet<String>,
    ) -> DispatchResult<Vec<Candidate>> {
        let max = config.max_search_radius_miles;
        Ok(self
            .measure(job, excluded)
            .await?
            .into_iter()
            .filter(|c| c.distance_miles <= max)
            .collect())
    }

    /// 过滤可接单且专业兼容的承包商并查询距离
    ///
    /// 单个承包商距离查询失败时跳过该承包商
    async fn measure(&self, job: &Job, excluded: &HashSet<String>) -> DispatchResult<Vec<Candidate>> {
        let pool: Vec<(Contractor, SpecializationMatch)> = self
            .contractors
            .list_dispatchable()?
            .into_iter()
            .filter(|c| c.is_dispatchable() && !excluded.contains(&c.contractor_id))
            .filter_map(|c| {
                let m = c.specialization_match(&job.service_type);
                m.is_compatible().then_some((c, m))
            })
            .collect();

        let lookups = pool
            .iter()
            .map(|(c, _)| self.location.distance_miles(c.location, job.location));
        let distances = join_all(lookups).await;

        let mut measured = Vec::with_capacity(pool.len());
        for ((contractor, specialization), distance) in pool.into_iter().zip(distances) {
            match distance {
                Ok(d) if d.is_finite() && d >= 0.0 => measured.push(Candidate {
                    contractor,
                    distance_miles: d,
                    specialization,
                    prior_customer_jobs: 0,
                }),
                Ok(d) => warn!(contractor_id = %contractor.contractor_id, distance = d, "距离非法, 跳过"),
                Err(e) => warn!(contractor_id = %contractor.contractor_id, error = %e, "距离查询失败, 跳过"),
            }
        }
        Ok(measured)
    }

    fn with_customer_history(
        &self,
        job: &Job,
        mut candidates: Vec<Candidate>,
        radius: f64,
    ) -> DispatchResult<CandidateSet> {
        if let Some(customer_id) = job.customer_id.as_deref() {
            for c in candidates.iter_mut() {
                c.prior_customer_jobs = self.jobs.count_prior_customer_jobs(
                    customer_id,
                    &c.contractor.contractor_id,
                    &job.job_id,
                )?;
            }
        }
        Ok(CandidateSet {
            radius_miles: radius,
            candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::domain::job::GeoPoint;
    use crate::domain::types::{Availability, JobPriority};
    use crate::engine::collaborators::StraightLineLocationService;
    use crate::repository::{ContractorRepository, JobRepository};

    // 纬度 1 度约 69 英里
    fn miles_north(miles: f64) -> GeoPoint {
        GeoPoint::new(miles / 69.09, 0.0)
    }

    fn contractor(id: &str, miles: f64, specs: &[&str]) -> Contractor {
        let mut c = Contractor::new(id, miles_north(miles));
        c.specializations = specs.iter().map(|s| s.to_string()).collect();
        c
    }

    fn setup(contractors: Vec<Contractor>) -> CandidateGenerator {
        let conn = open_in_memory().unwrap();
        let repo = ContractorRepository::new(conn.clone());
        for c in &contractors {
            repo.upsert(c).unwrap();
        }
        CandidateGenerator::new(
            Arc::new(repo),
            Arc::new(JobRepository::new(conn)),
            Arc::new(StraightLineLocationService),
        )
    }

    fn job() -> Job {
        Job::new("J1", "plumbing.drain", GeoPoint::new(0.0, 0.0), JobPriority::Scheduled)
    }

    #[tokio::test]
    async fn test_initial_radius_hit() {
        let gen = setup(vec![
            contractor("C1", 10.0, &["plumbing.drain"]),
            contractor("C2", 40.0, &["plumbing.drain"]),
        ]);
        let set = gen
            .generate(&job(), &AssignmentConfig::default(), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(set.radius_miles, 25.0);
        assert_eq!(set.candidates.len(), 1);
        assert_eq!(set.candidates[0].contractor.contractor_id, "C1");
    }

    #[tokio::test]
    async fn test_radius_expands_until_candidates_found() {
        let gen = setup(vec![contractor("C1", 45.0, &["general"])]);
        let set = gen
            .generate(&job(), &AssignmentConfig::default(), &HashSet::new())
            .await
            .unwrap();
        assert_eq!(set.radius_miles, 50.0);
        assert_eq!(set.candidates[0].specialization, SpecializationMatch::General);
    }

    #[tokio::test]
    async fn test_no_candidates_after_max_radius() {
        let gen = setup(vec![
            contractor("C1", 150.0, &["plumbing.drain"]),
            contractor("C2", 5.0, &["electrical"]),
        ]);
        let err = gen
            .generate(&job(), &AssignmentConfig::default(), &HashSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoCandidatesAvailable { .. }));
    }

    #[tokio::test]
    async fn test_excluded_and_offline_skipped() {
        let mut offline = contractor("C2", 3.0, &["plumbing.drain"]);
        offline.availability = Availability::Offline;
        let mut full = contractor("C3", 3.0, &["plumbing.drain"]);
        full.availability = Availability::Busy;
        full.current_workload = 1;
        let gen = setup(vec![contractor("C1", 3.0, &["plumbing.drain"]), offline, full]);

        let excluded: HashSet<String> = ["C1".to_string()].into_iter().collect();
        let err = gen
            .generate(&job(), &AssignmentConfig::default(), &excluded)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NoCandidatesAvailable { .. }));
    }
}
