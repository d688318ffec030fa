// ==========================================
// 派单工作池测试
// ==========================================


#[cfg(test)]
mod worker_pool_test {
    use contractor_dispatch::domain::types::JobStatus;
    use contractor_dispatch::engine::{DispatchOutcome, DispatchWorkerPool, JobReport};
    use std::collections::HashMap;

    use crate::test_helpers::test_data_builder::{job, three_ranked_contractors};
    use crate::test_helpers::TestEnv;

    const SERVICE: &str = "plumbing.drain";

    fn env_with_jobs(n: usize) -> TestEnv {
        let env = TestEnv::new();
        for c in three_ranked_contractors(SERVICE) {
            env.add_contractor(&c);
        }
        for i in 0..n {
            env.add_job(&job(&format!("J{}", i), SERVICE));
        }
        env
    }

    async fn collect(mut rx: tokio::sync::mpsc::UnboundedReceiver<JobReport>) -> Vec<JobReport> {
        let mut reports = Vec::new();
        while let Some(report) = rx.recv().await {
            reports.push(report);
        }
        reports
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_dispatches_all_submitted_jobs() {
        let env = env_with_jobs(5);
        let (pool, rx) = DispatchWorkerPool::start(env.orchestrator.clone(), 2, 8);
        for i in 0..5 {
            pool.submit(format!("J{}", i)).await.unwrap();
        }
        pool.shutdown().await;

        let reports = collect(rx).await;
        assert_eq!(reports.len(), 5);
        for report in &reports {
            assert!(
                matches!(report.result, Ok(DispatchOutcome::Offered { .. })),
                "{}: {:?}",
                report.job_id,
                report.result
            );
            assert_eq!(env.job(&report.job_id).status, JobStatus::Offering);
        }
        assert_eq!(env.orchestrator.pending_timer_count(), 5);
        env.orchestrator.shutdown();
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_jobs_reported_as_errors() {
        let env = env_with_jobs(1);
        let (pool, rx) = DispatchWorkerPool::start(env.orchestrator.clone(), 4, 4);
        pool.submit("J0").await.unwrap();
        pool.submit("J0").await.unwrap();
        pool.submit("MISSING").await.unwrap();
        pool.shutdown().await;

        let reports = collect(rx).await;
        assert_eq!(reports.len(), 3);

        let mut by_job: HashMap<&str, Vec<&JobReport>> = HashMap::new();
        for report in &reports {
            by_job.entry(report.job_id.as_str()).or_default().push(report);
        }
        let j0 = &by_job["J0"];
        assert_eq!(j0.iter().filter(|r| r.result.is_ok()).count(), 1);
        assert_eq!(j0.iter().filter(|r| r.result.is_err()).count(), 1);
        assert!(by_job["MISSING"][0].result.is_err());

        // 工单锁保证同一工单只有一个未决报价
        let attempts = env.orchestrator.repositories().attempts.find_by_job("J0").unwrap();
        assert_eq!(attempts.len(), 1);
        env.orchestrator.shutdown();
    }
}
