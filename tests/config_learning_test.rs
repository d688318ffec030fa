// ==========================================
// 配置版本与学习调参集成测试
// ==========================================
// 职责: 运行中配置快照、权重提案生成/激活/驳回
// ==========================================


#[cfg(test)]
mod config_learning_test {
    use contractor_dispatch::api::{ApiError, ConfigApi, DispatchApi, JobCompletionRequest};
    use contractor_dispatch::domain::action_log::ActionType;
    use contractor_dispatch::domain::types::ProposalStatus;
    use contractor_dispatch::engine::{DispatchOutcome, LearningAdjuster};
    use contractor_dispatch::repository::{ActionLogRepository, WeightProposalRepository};
    use std::sync::Arc;

    use crate::test_helpers::test_data_builder::{job, three_ranked_contractors, ContractorBuilder};
    use crate::test_helpers::TestEnv;

    fn config_api(env: &TestEnv) -> ConfigApi {
        let repos = env.orchestrator.repositories();
        let action_log = Arc::new(ActionLogRepository::new(env.conn.clone()));
        let learning = Arc::new(LearningAdjuster::new(
            env.config.clone(),
            repos.completions.clone(),
            Arc::new(WeightProposalRepository::new(env.conn.clone())),
            action_log.clone(),
        ));
        ConfigApi::new(env.config.clone(), learning, action_log)
    }

    fn offered(outcome: DispatchOutcome) -> (String, String) {
        match outcome {
            DispatchOutcome::Offered {
                attempt_id,
                contractor_id,
                ..
            } => (attempt_id, contractor_id),
            other => panic!("期望 Offered, 实际 {:?}", other),
        }
    }

    // ==========================================
    // 配置快照
    // ==========================================

    #[tokio::test]
    async fn test_in_flight_run_keeps_config_snapshot() {
        let env = TestEnv::new();
        for c in three_ranked_contractors("plumbing.drain") {
            env.add_contractor(&c);
        }
        env.add_job(&job("J1", "plumbing.drain"));
        let api = config_api(&env);
        let before = api.get_active_config().unwrap();

        let (a1, _) = offered(env.orchestrator.assign_job("J1").await.unwrap());

        // 运行中提高门槛: C2 (≈82) 在新配置下不达标
        let mut stricter = before.clone();
        stricter.min_score_threshold = 85.0;
        let stored = api.put_config(&stricter, "ops", "提高门槛").unwrap();
        assert_eq!(stored.version, before.version + 1);

        let (_, next) = offered(env.orchestrator.decline_offer(&a1, None).await.unwrap());
        assert_eq!(next, "C2");

        let run = env
            .orchestrator
            .repositories()
            .runs
            .find_latest_for_job("J1")
            .unwrap()
            .unwrap();
        assert_eq!(run.config_version(), before.version);
        assert_eq!(run.config.min_score_threshold, before.min_score_threshold);

        let versions = api.list_versions().unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions.iter().filter(|v| v.is_active).count(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_json_reflects_active_version() {
        let env = TestEnv::new();
        let api = config_api(&env);
        let mut config = api.get_active_config().unwrap();
        config.offer_timeout_seconds = 300;
        api.put_config(&config, "ops", "延长时限").unwrap();

        let json: serde_json::Value = serde_json::from_str(&api.get_config_snapshot().unwrap()).unwrap();
        assert_eq!(json["offer_timeout_seconds"], 300);
        assert_eq!(json["version"], 2);
    }

    // ==========================================
    // 学习调参
    // ==========================================

    /// 四名承包商各自独占一个专业，评分 2/3/4/5 星
    const RATED: [(&str, &str, f64); 4] = [
        ("L2", "svc.two", 2.0),
        ("L3", "svc.three", 3.0),
        ("L4", "svc.four", 4.0),
        ("L5", "svc.five", 5.0),
    ];

    /// 完成 n 次派单并回传与星级正相关的履约结果
    async fn dispatch_and_complete(env: &TestEnv, n: usize) {
        let api = DispatchApi::new(env.orchestrator.clone(), env.tracker.clone());
        for i in 0..n {
            let (contractor_id, service, rating) = RATED[i % RATED.len()];
            let job_id = format!("LJ{}", i);
            env.add_job(&job(&job_id, service));

            let (attempt_id, offered_to) = offered(api.assign_job(&job_id).await.unwrap());
            assert_eq!(offered_to, contractor_id);
            api.accept_offer(&attempt_id).await.unwrap();

            api.record_job_completion(JobCompletionRequest {
                job_id,
                contractor_id: contractor_id.to_string(),
                completed: true,
                on_time: rating >= 4.0,
                customer_rating: Some(rating),
            })
            .await
            .unwrap();
        }
    }

    fn learning_env() -> TestEnv {
        let env = TestEnv::new();
        env.update_config(|c| {
            c.learning_enabled = true;
            c.min_score_threshold = 40.0;
        });
        for (id, service, rating) in RATED {
            env.add_contractor(&ContractorBuilder::new(id).skills(&[service]).rating(rating).build());
        }
        env
    }

    #[tokio::test]
    async fn test_too_few_completions_yield_no_proposal() {
        let env = learning_env();
        dispatch_and_complete(&env, 8).await;
        assert!(config_api(&env).generate_proposal("ops").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabled_learning_rejected() {
        let env = TestEnv::new();
        let err = config_api(&env).generate_proposal("ops").unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_proposal_favours_rating_and_needs_explicit_activation() {
        let env = learning_env();
        dispatch_and_complete(&env, 24).await;
        let api = config_api(&env);
        let active = api.get_active_config().unwrap();

        let proposal = api.generate_proposal("ops").unwrap().unwrap();
        assert_eq!(proposal.sample_size, 24);
        assert_eq!(proposal.status, ProposalStatus::Proposed);
        assert_eq!(proposal.base_config_version, active.version);
        assert!(proposal.proposed_weights.rating > active.weights.rating);
        assert!((proposal.proposed_weights.sum() - 100.0).abs() <= 0.01);

        // 生成提案不改写线上配置
        assert_eq!(api.get_active_config().unwrap().version, active.version);
        assert_eq!(api.list_proposals(Some(ProposalStatus::Proposed)).unwrap().len(), 1);

        let applied = api.activate_proposal(&proposal.proposal_id, "ops").unwrap();
        assert_eq!(applied.version, active.version + 1);
        assert_eq!(applied.weights, proposal.proposed_weights);
        assert_eq!(api.get_active_config().unwrap().weights, proposal.proposed_weights);

        let stored = &api.list_proposals(Some(ProposalStatus::Activated)).unwrap()[0];
        assert_eq!(stored.applied_config_version, Some(applied.version));
        assert_eq!(stored.decided_by.as_deref(), Some("ops"));

        // 已处理的提案不能再次处理
        let err = api.reject_proposal(&proposal.proposal_id, "ops", None).unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_rejected_proposal_leaves_config_untouched() {
        let env = learning_env();
        dispatch_and_complete(&env, 20).await;
        let api = config_api(&env);
        let active = api.get_active_config().unwrap();

        let proposal = api.generate_proposal("ops").unwrap().unwrap();
        api.reject_proposal(&proposal.proposal_id, "ops", Some("样本期太短")).unwrap();

        assert_eq!(api.get_active_config().unwrap().version, active.version);
        assert_eq!(api.list_proposals(Some(ProposalStatus::Rejected)).unwrap().len(), 1);
        assert!(matches!(
            api.activate_proposal(&proposal.proposal_id, "ops"),
            Err(ApiError::ValidationError(_))
        ));

        let log = &env.orchestrator.repositories().action_log;
        assert_eq!(log.count_by_type(ActionType::ProposalGenerated).unwrap(), 1);
        assert_eq!(log.count_by_type(ActionType::ProposalRejected).unwrap(), 1);
    }
}
