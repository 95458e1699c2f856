#[cfg(test)]
mod tests {
    use super::super::warehouse_tools::{WarehouseToolKind, build_registry};
    use super::super::*;
    use crate::config::WarehouseConfig;
    use crate::warehouse::{DataAccessLayer, FixtureWarehouse, PerformanceRecord};
    use crate::types::WarehouseLocation;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::time::Duration;

    fn record(day: &str, campaign: &str, cost: f64, conv: f64, rev: f64) -> PerformanceRecord {
        PerformanceRecord {
            date: NaiveDate::parse_from_str(day, "%Y-%m-%d").unwrap(),
            campaign_id: campaign.to_string(),
            device: Some("mobile".to_string()),
            region: Some("US".to_string()),
            cost,
            conversions: conv,
            revenue: rev,
            clicks: 10.0,
            impressions: 100.0,
        }
    }

    fn dal() -> Arc<DataAccessLayer> {
        let records = vec![
            record("2024-07-01", "c-1", 6000.0, 30.0, 9000.0),
            record("2024-07-01", "c-2", 3000.0, 15.0, 10500.0),
            record("2024-07-02", "c-3", 1000.0, 5.0, 1500.0),
            record("2024-07-02", "c-4", 0.0, 0.0, 0.0),
        ];
        let config = WarehouseConfig {
            retry_delay_ms: 1,
            ..WarehouseConfig::default()
        };
        Arc::new(DataAccessLayer::new(
            Arc::new(FixtureWarehouse::new(records)),
            &config,
        ))
    }

    fn registry(names: &[&str]) -> ToolRegistry {
        build_registry(names, &dal(), &WarehouseLocation::default()).unwrap()
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest::new(format!("call-{}", name), name, arguments)
    }

    /// 按参数中的 delay_ms 等待后回显参数
    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
            let delay = arguments["delay_ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(arguments)
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl ToolHandler for FailingHandler {
        async fn call(&self, _arguments: Value) -> Result<Value, ToolError> {
            Err(ToolError::DataAccess(DataAccessError::RetriesExhausted {
                attempts: 3,
                last: Box::new(DataAccessError::Unavailable("503".to_string())),
            }))
        }
    }

    fn echo_descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(
            name,
            "echo",
            json!({
                "type": "object",
                "properties": { "delay_ms": { "type": "integer" } },
                "required": ["delay_ms"]
            }),
            Arc::new(EchoHandler),
        )
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_descriptor("echo")).unwrap();
        let err = registry.register(echo_descriptor("echo")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateTool("echo".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_is_scoped_to_declared_tools() {
        let registry = registry(&["get_current_metrics", "get_segment_breakdown"]);
        assert_eq!(registry.names(), vec!["get_current_metrics", "get_segment_breakdown"]);
        assert!(!registry.contains("get_time_series"));

        let definitions = registry.definitions();
        assert_eq!(definitions.len(), 2);
        assert_eq!(
            definitions[1].parameters["properties"]["dimension"]["enum"],
            json!(["campaign_id", "device", "region"])
        );
    }

    #[test]
    fn test_natural_language_tool_requires_generator() {
        let err = build_registry(&["query_warehouse_nl"], &dal(), &WarehouseLocation::default())
            .unwrap_err();
        assert_eq!(err, RegistryError::UnavailableTool("query_warehouse_nl".to_string()));

        let err = build_registry(&["drop_tables"], &dal(), &WarehouseLocation::default())
            .unwrap_err();
        assert_eq!(err, RegistryError::UnavailableTool("drop_tables".to_string()));
    }

    #[test]
    fn test_tool_kind_names_round_trip() {
        for kind in WarehouseToolKind::ALL {
            assert_eq!(WarehouseToolKind::from_name(kind.name()), Some(kind));
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_is_a_failed_result() {
        let registry = registry(&["get_current_metrics"]);
        let result = registry
            .resolve(&call("get_time_series", json!({})))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.call_id, "call-get_time_series");
        let error = result.payload["error"].as_str().unwrap();
        assert!(error.contains("unknown tool 'get_time_series'"));
        assert!(error.contains("get_current_metrics"));
    }

    #[tokio::test]
    async fn test_schema_mismatches_are_failed_results() {
        let registry = registry(&["get_segment_breakdown"]);

        let wrong_enum = registry
            .resolve(&call("get_segment_breakdown", json!({"dimension": "cost"})))
            .await
            .unwrap();
        assert!(!wrong_enum.success);

        let wrong_type = registry
            .resolve(&call("get_segment_breakdown", json!({"limit": "ten"})))
            .await
            .unwrap();
        assert!(!wrong_type.success);

        let bad_date = registry
            .resolve(&call("get_segment_breakdown", json!({"start_date": "July 1st"})))
            .await
            .unwrap();
        assert!(!bad_date.success);

        let inverted = registry
            .resolve(&call(
                "get_segment_breakdown",
                json!({"start_date": "2024-07-02", "end_date": "2024-07-01"}),
            ))
            .await
            .unwrap();
        assert!(!inverted.success);
    }

    #[tokio::test]
    async fn test_missing_required_field() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_descriptor("echo")).unwrap();
        let result = registry.resolve(&call("echo", json!({}))).await.unwrap();
        assert!(!result.success);
        assert!(
            result.payload["error"]
                .as_str()
                .unwrap()
                .contains("missing required field: 'delay_ms'")
        );
    }

    #[tokio::test]
    async fn test_data_access_failure_is_escalated() {
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDescriptor::new(
                "broken",
                "always fails",
                json!({"type": "object", "properties": {}}),
                Arc::new(FailingHandler),
            ))
            .unwrap();

        let err = registry.resolve(&call("broken", json!({}))).await.unwrap_err();
        assert!(matches!(err, DataAccessError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_batch_keeps_request_order() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_descriptor("echo")).unwrap();

        let requests = vec![
            ToolCallRequest::new("a", "echo", json!({"delay_ms": 40})),
            ToolCallRequest::new("b", "echo", json!({"delay_ms": 1})),
            ToolCallRequest::new("c", "missing", json!({})),
            ToolCallRequest::new("d", "echo", json!({"delay_ms": 10})),
        ];
        let results = registry.resolve_all(&requests).await;

        let ids: Vec<String> = results
            .iter()
            .map(|r| r.as_ref().unwrap().call_id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert!(!results[2].as_ref().unwrap().success);
    }

    #[tokio::test]
    async fn test_current_metrics_tool_returns_rows() {
        let registry = registry(&["get_current_metrics"]);
        let result = registry
            .resolve(&call("get_current_metrics", json!({"campaign_id": "c-2"})))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.payload[0]["cost"], json!(3000.0));
        assert_eq!(result.payload[0]["roas"], json!(3.5));
    }

    #[tokio::test]
    async fn test_dispatch_is_deterministic() {
        let registry = registry(&["get_segment_breakdown"]);
        let request = call("get_segment_breakdown", json!({"dimension": "campaign_id"}));
        let first = registry.resolve(&request).await.unwrap();
        let second = registry.resolve(&request).await.unwrap();
        assert_eq!(first.payload, second.payload);
    }

    #[tokio::test]
    async fn test_segment_efficiency_orders_worst_first() {
        let registry = registry(&["compare_segment_efficiency"]);
        let result = registry
            .resolve(&call("compare_segment_efficiency", json!({})))
            .await
            .unwrap();

        assert!(result.success);
        // 基线 ROAS = 21000 / 10000 = 2.1
        assert_eq!(result.payload["baseline"]["roas"], json!(2.1));

        let segments = result.payload["segments"].as_array().unwrap();
        let order: Vec<&str> = segments
            .iter()
            .map(|s| s["segment"].as_str().unwrap())
            .collect();
        assert_eq!(order, vec!["c-1", "c-3", "c-2", "c-4"]);
        assert!(segments[0]["roas_delta"].as_f64().unwrap() < 0.0);
        assert!(segments[2]["roas_delta"].as_f64().unwrap() > 0.0);
        assert_eq!(segments[3]["roas"], Value::Null);
        assert_eq!(segments[3]["roas_delta"], Value::Null);
    }
}
