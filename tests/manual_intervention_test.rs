// ==========================================
// 人工干预集成测试
// ==========================================
// 职责: 改派、立即智能派单、挂起工单、API 入参校验
// ==========================================


#[cfg(test)]
mod manual_intervention_test {
    use contractor_dispatch::api::{ApiError, DispatchApi, JobCompletionRequest};
    use contractor_dispatch::domain::action_log::ActionType;
    use contractor_dispatch::domain::types::{AssignmentMethod, JobStatus};
    use contractor_dispatch::engine::{AlertKind, DispatchError, DispatchOutcome};

    use crate::test_helpers::test_data_builder::{job, three_ranked_contractors};
    use crate::test_helpers::TestEnv;

    const SERVICE: &str = "plumbing.drain";

    fn env_with_three() -> TestEnv {
        let env = TestEnv::new();
        for c in three_ranked_contractors(SERVICE) {
            env.add_contractor(&c);
        }
        env.add_job(&job("J1", SERVICE));
        env
    }

    fn api(env: &TestEnv) -> DispatchApi {
        DispatchApi::new(env.orchestrator.clone(), env.tracker.clone())
    }

    /// 派单并由 C1 接受
    async fn assigned_to_c1(env: &TestEnv) {
        match env.orchestrator.assign_job("J1").await.unwrap() {
            DispatchOutcome::Offered { attempt_id, .. } => {
                env.orchestrator.accept_offer(&attempt_id).await.unwrap();
            }
            other => panic!("期望 Offered, 实际 {:?}", other),
        }
    }

    fn count(env: &TestEnv, action: ActionType) -> i64 {
        env.orchestrator.repositories().action_log.count_by_type(action).unwrap()
    }

    // ==========================================
    // 改派
    // ==========================================

    #[tokio::test]
    async fn test_reassign_to_named_contractor() {
        let env = env_with_three();
        assigned_to_c1(&env).await;

        let outcome = env
            .orchestrator
            .reassign("J1", "ops", "客户指定", Some("C2"))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            DispatchOutcome::Assigned { ref contractor_id, method: AssignmentMethod::Manual, .. }
                if contractor_id == "C2"
        ));

        let job = env.job("J1");
        assert_eq!(job.assigned_contractor_id.as_deref(), Some("C2"));
        assert_eq!(job.assignment_method, Some(AssignmentMethod::Manual));
        assert_eq!(env.contractor("C1").current_workload, 0);
        assert_eq!(env.contractor("C2").current_workload, 1);
        assert_eq!(count(&env, ActionType::Reassign), 1);
        assert_eq!(count(&env, ActionType::ManualAssign), 1);

        let attempts = env.orchestrator.repositories().attempts.find_by_job("J1").unwrap();
        let last = attempts.last().unwrap();
        assert_eq!(last.method, AssignmentMethod::Manual);
        assert!(last.run_id.is_none());
        assert_eq!(last.outcome_reason.as_deref(), Some("客户指定"));
    }

    #[tokio::test]
    async fn test_reassign_without_target_excludes_previous() {
        let env = env_with_three();
        assigned_to_c1(&env).await;

        let outcome = env.orchestrator.reassign("J1", "ops", "未按时上门", None).await.unwrap();
        match outcome {
            DispatchOutcome::Offered { contractor_id, .. } => assert_eq!(contractor_id, "C2"),
            other => panic!("期望 Offered, 实际 {:?}", other),
        }

        let run = env
            .orchestrator
            .repositories()
            .runs
            .find_latest_for_job("J1")
            .unwrap()
            .unwrap();
        assert_eq!(run.excluded_contractor_ids, vec!["C1".to_string()]);
        assert!(!run.eligible_contractor_ids.contains(&"C1".to_string()));
        assert_eq!(env.contractor("C1").current_workload, 0);
    }

    #[tokio::test]
    async fn test_reassign_rejects_blank_reason_and_same_target() {
        let env = env_with_three();
        assigned_to_c1(&env).await;

        let err = api(&env).reassign("J1", "ops", "  ", None).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidInput(_)));

        let err = env
            .orchestrator
            .reassign("J1", "ops", "换人", Some("C1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
        assert_eq!(env.job("J1").assigned_contractor_id.as_deref(), Some("C1"));
    }

    #[tokio::test]
    async fn test_reassign_requires_assigned_or_unassignable() {
        let env = env_with_three();
        env.orchestrator.assign_job("J1").await.unwrap();

        let err = env.orchestrator.reassign("J1", "ops", "换人", None).await.unwrap_err();
        assert!(matches!(err, DispatchError::JobNotActive { status: JobStatus::Offering, .. }));
    }

    // ==========================================
    // 立即智能派单
    // ==========================================

    #[tokio::test]
    async fn test_ai_assign_now_reopens_unassignable_job() {
        let env = env_with_three();
        env.update_config(|c| {
            c.progressive_enabled = false;
            c.fallback_enabled = false;
        });
        env.orchestrator.assign_job("J1").await.unwrap();
        assert_eq!(env.job("J1").status, JobStatus::Unassignable);

        env.update_config(|c| c.progressive_enabled = true);
        let outcome = api(&env).ai_assign_now("J1", "ops").await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Offered { ref contractor_id, .. } if contractor_id == "C1"));
        assert_eq!(count(&env, ActionType::ManualDispatch), 1);

        // 每次运行快照当时的配置版本
        let run = env
            .orchestrator
            .repositories()
            .runs
            .find_latest_for_job("J1")
            .unwrap()
            .unwrap();
        assert_eq!(run.config_version(), 3);
    }

    // ==========================================
    // 挂起
    // ==========================================

    #[tokio::test]
    async fn test_state_conflict_parks_job_for_operator() {
        let env = env_with_three();
        let attempt_id = match env.orchestrator.assign_job("J1").await.unwrap() {
            DispatchOutcome::Offered { attempt_id, .. } => attempt_id,
            other => panic!("期望 Offered, 实际 {:?}", other),
        };

        let assigned_before = env.contractor("C1").history.jobs_assigned;
        env.force_job_status("J1", "NEW");
        let err = env.orchestrator.accept_offer(&attempt_id).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::InvalidStateTransition { from: JobStatus::New, to: JobStatus::Assigned, .. }
        ));
        // 未落定的指派不计入历史
        let c1 = env.contractor("C1");
        assert_eq!(c1.current_workload, 0);
        assert_eq!(c1.history.jobs_assigned, assigned_before);

        let parked = api(&env).list_parked_jobs().unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].job_id.as_deref(), Some("J1"));

        let alerts = env.alerter.alerts();
        assert!(alerts.iter().any(|a| a.kind == AlertKind::JobParked && a.job_id == "J1"));
    }

    // ==========================================
    // 完工回传 / 查询
    // ==========================================

    #[tokio::test]
    async fn test_completion_releases_capacity_once() {
        let env = env_with_three();
        assigned_to_c1(&env).await;
        let api = api(&env);

        let request = JobCompletionRequest {
            job_id: "J1".to_string(),
            contractor_id: "C1".to_string(),
            completed: true,
            on_time: true,
            customer_rating: Some(4.5),
        };
        api.record_job_completion(request.clone()).await.unwrap();

        let c1 = env.contractor("C1");
        assert_eq!(c1.current_workload, 0);
        assert_eq!(c1.history.jobs_completed, 1);
        assert_eq!(c1.history.jobs_completed_on_time, 1);

        let err = api.record_job_completion(request).await.unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
        assert_eq!(env.contractor("C1").current_workload, 0);
    }

    #[tokio::test]
    async fn test_completion_for_wrong_contractor_rejected() {
        let env = env_with_three();
        assigned_to_c1(&env).await;

        let err = api(&env)
            .record_job_completion(JobCompletionRequest {
                job_id: "J1".to_string(),
                contractor_id: "C2".to_string(),
                completed: true,
                on_time: false,
                customer_rating: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_api_queries_and_input_checks() {
        let env = env_with_three();
        let api = api(&env);

        assert!(matches!(api.assign_job(" ").await, Err(ApiError::InvalidInput(_))));
        assert!(matches!(api.cancel_job("J1", "", None).await, Err(ApiError::InvalidInput(_))));
        assert!(matches!(api.get_job("NOPE"), Err(ApiError::NotFound(_))));

        api.assign_job("J1").await.unwrap();
        assert_eq!(api.get_job("J1").unwrap().status, JobStatus::Offering);
        assert_eq!(api.get_job_scores("J1").unwrap().len(), 3);
        assert_eq!(api.get_job_attempts("J1").unwrap().len(), 1);

        let err = api.assign_job("J1").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidStateTransition { .. }));
    }
}
