// ==========================================
// 派单效果统计集成测试
// ==========================================
// 职责: 全量重算口径、增量与全量一致、查询入参
// ==========================================


#[cfg(test)]
mod effectiveness_test {
    use chrono::{Duration, Utc};
    use contractor_dispatch::api::{ApiError, DispatchApi};
    use contractor_dispatch::domain::types::{AttemptOutcome, PeriodKind};
    use contractor_dispatch::domain::AssignmentAttempt;
    use contractor_dispatch::engine::DispatchOutcome;

    use crate::test_helpers::test_data_builder::{job, three_ranked_contractors, ContractorBuilder};
    use crate::test_helpers::TestEnv;

    fn resolved_offer(job_id: &str, outcome: AttemptOutcome, score: f64) -> AssignmentAttempt {
        let now = Utc::now();
        let mut attempt = AssignmentAttempt::offer(job_id, "RUN-H", 1, "C1", "S-H", score, now - Duration::seconds(30), 120);
        attempt.outcome = outcome;
        attempt.resolved_at = Some(now);
        attempt
    }

    #[tokio::test]
    async fn test_seven_of_ten_is_exactly_seventy_percent() {
        let env = TestEnv::new();
        let attempts = &env.orchestrator.repositories().attempts;
        for i in 0..7 {
            attempts
                .insert(&resolved_offer(&format!("H{}", i), AttemptOutcome::Accepted, 80.0))
                .unwrap();
        }
        for (i, outcome) in [AttemptOutcome::Declined, AttemptOutcome::Timeout, AttemptOutcome::Declined]
            .into_iter()
            .enumerate()
        {
            attempts
                .insert(&resolved_offer(&format!("HX{}", i), outcome, 55.0))
                .unwrap();
        }

        let api = DispatchApi::new(env.orchestrator.clone(), env.tracker.clone());
        let today = Utc::now().date_naive();
        for kind in PeriodKind::ALL {
            let snapshot = api.recompute_effectiveness(kind, today).unwrap();
            assert_eq!(snapshot.total_assignments, 10, "{}", kind);
            assert_eq!(snapshot.successful_assignments, 7);
            assert_eq!(snapshot.failed_assignments, 3);
            assert_eq!(snapshot.success_rate, 70.0);
            assert_eq!(snapshot.average_score, 80.0);
        }
    }

    #[tokio::test]
    async fn test_incremental_matches_full_recompute() {
        let env = TestEnv::new();
        for c in three_ranked_contractors("plumbing.drain") {
            env.add_contractor(&c);
        }
        env.add_contractor(&ContractorBuilder::new("R1").miles_away(45.0).general().build());
        env.add_job(&job("J1", "plumbing.drain"));
        env.add_job(&job("J2", "roofing.repair"));
        env.add_job(&job("J3", "pest.control"));
        let orch = &env.orchestrator;

        // J1: C1 拒绝, C2 接受
        let a1 = match orch.assign_job("J1").await.unwrap() {
            DispatchOutcome::Offered { attempt_id, .. } => attempt_id,
            other => panic!("期望 Offered, 实际 {:?}", other),
        };
        let a2 = match orch.decline_offer(&a1, None).await.unwrap() {
            DispatchOutcome::Offered { attempt_id, .. } => attempt_id,
            other => panic!("期望 Offered, 实际 {:?}", other),
        };
        orch.accept_offer(&a2).await.unwrap();

        // J2: 只有通用承包商且低于门槛, 兜底
        orch.assign_job("J2").await.unwrap();

        // J3: 候选均低于门槛且关闭兜底, 无法指派
        env.update_config(|c| c.fallback_enabled = false);
        orch.assign_job("J3").await.unwrap();

        env.drain_events();
        let today = Utc::now().date_naive();
        let incremental = env.tracker.get_snapshot(PeriodKind::Week, today).unwrap();
        assert_eq!(incremental.total_assignments, 2);
        assert_eq!(incremental.successful_assignments, 1);
        assert_eq!(incremental.failed_assignments, 1);
        assert_eq!(incremental.success_rate, 50.0);
        assert_eq!(incremental.fallback_assignments, 1);
        assert_eq!(incremental.unassignable_jobs, 1);

        let full = env.tracker.recompute(PeriodKind::Week, today).unwrap();
        assert_eq!(full.total_assignments, incremental.total_assignments);
        assert_eq!(full.successful_assignments, incremental.successful_assignments);
        assert_eq!(full.failed_assignments, incremental.failed_assignments);
        assert_eq!(full.fallback_assignments, incremental.fallback_assignments);
        assert_eq!(full.manual_assignments, incremental.manual_assignments);
        assert_eq!(full.unassignable_jobs, incremental.unassignable_jobs);
        assert!((full.average_score - incremental.average_score).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_query_before_events_drained_counts_once() {
        let env = TestEnv::new();
        for c in three_ranked_contractors("plumbing.drain") {
            env.add_contractor(&c);
        }
        env.add_job(&job("J1", "plumbing.drain"));
        let api = DispatchApi::new(env.orchestrator.clone(), env.tracker.clone());

        match env.orchestrator.assign_job("J1").await.unwrap() {
            DispatchOutcome::Offered { attempt_id, .. } => {
                env.orchestrator.accept_offer(&attempt_id).await.unwrap();
            }
            other => panic!("期望 Offered, 实际 {:?}", other),
        }

        // 接受事件仍在通道中, 查询已从日志计入
        let today = Utc::now().date_naive();
        let queried = api.get_effectiveness(PeriodKind::Day, today).unwrap();
        assert_eq!(queried.total_assignments, 1);

        assert_eq!(env.drain_events(), 1);
        for kind in PeriodKind::ALL {
            let snapshot = api.get_effectiveness(kind, today).unwrap();
            assert_eq!(snapshot.total_assignments, 1, "{}", kind);
            assert_eq!(snapshot.successful_assignments, 1);
            assert_eq!(snapshot.success_rate, 100.0);
        }

        // 运维工具对运行中的进程重算, 结果不变
        let recomputed = api.recompute_effectiveness(PeriodKind::Week, today).unwrap();
        assert_eq!(recomputed.total_assignments, 1);
    }

    #[tokio::test]
    async fn test_list_range_validated() {
        let env = TestEnv::new();
        let api = DispatchApi::new(env.orchestrator.clone(), env.tracker.clone());
        let today = Utc::now().date_naive();

        let err = api
            .list_effectiveness(PeriodKind::Day, today, today - Duration::days(1))
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        api.get_effectiveness(PeriodKind::Day, today).unwrap();
        let listed = api.list_effectiveness(PeriodKind::Day, today, today).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].total_assignments, 0);
    }
}
