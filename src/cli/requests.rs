//! Control requests accepted by `canary exec`
//!
//! Each stdin line is one request tagged by `op`:
//!
//! ```json
//! {"op": "publish", "function": "orders"}
//! {"op": "update_alias", "function": "orders", "alias": "PROD", "primary": 1, "secondary": 2, "weight": 0.1}
//! ```

use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::routing::{Gateway, Qualifier, RetryPolicy, RoutingResult, LATEST};

/// One control-plane request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateFunction {
        function: String,
        code_ref: String,
        #[serde(default)]
        config_ref: String,
    },
    UpdateLatest {
        function: String,
        code_ref: String,
        #[serde(default)]
        config_ref: String,
    },
    Publish {
        function: String,
        #[serde(default)]
        description: String,
    },
    GetVersion {
        function: String,
        version: u64,
    },
    ListVersions {
        function: String,
    },
    DeleteVersion {
        function: String,
        qualifier: String,
    },
    CreateAlias {
        function: String,
        alias: String,
        primary: u64,
    },
    UpdateAlias {
        function: String,
        alias: String,
        primary: u64,
        #[serde(default)]
        secondary: Option<u64>,
        #[serde(default)]
        weight: Option<f64>,
    },
    GetAlias {
        function: String,
        alias: String,
    },
    ListAliases {
        function: String,
    },
    DeleteAlias {
        function: String,
        alias: String,
    },
    SetReservedConcurrency {
        function: String,
        limit: u32,
    },
    RemoveReservedConcurrency {
        function: String,
    },
    GetConcurrency {
        function: String,
    },
    /// Route, admit and immediately complete one invocation
    Invoke {
        function: String,
        #[serde(default)]
        alias: Option<String>,
    },
    Metrics,
}

impl Request {
    /// Whether the request changes persisted state
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Request::CreateFunction { .. }
                | Request::UpdateLatest { .. }
                | Request::Publish { .. }
                | Request::DeleteVersion { .. }
                | Request::CreateAlias { .. }
                | Request::UpdateAlias { .. }
                | Request::DeleteAlias { .. }
                | Request::SetReservedConcurrency { .. }
                | Request::RemoveReservedConcurrency { .. }
        )
    }
}

/// Apply one request to `gateway`
pub fn apply<R: Rng + ?Sized>(
    gateway: &Gateway,
    request: Request,
    retry: &RetryPolicy,
    rng: &mut R,
) -> RoutingResult<Value> {
    let versions = gateway.versions();
    let aliases = gateway.aliases();
    let governor = gateway.governor();

    let value = match request {
        Request::CreateFunction {
            function,
            code_ref,
            config_ref,
        } => json!(versions.create_function(&function, &code_ref, &config_ref)?),
        Request::UpdateLatest {
            function,
            code_ref,
            config_ref,
        } => json!(versions.update_latest(&function, &code_ref, &config_ref)?),
        Request::Publish {
            function,
            description,
        } => json!(versions.publish(&function, &description)?),
        Request::GetVersion { function, version } => json!(versions.get(&function, version)?),
        Request::ListVersions { function } => json!(versions.list_versions(&function)?),
        Request::DeleteVersion {
            function,
            qualifier,
        } => {
            let qualifier: Qualifier = qualifier.parse()?;
            versions.delete(&function, qualifier)?;
            json!({ "deleted": qualifier.to_string() })
        }
        Request::CreateAlias {
            function,
            alias,
            primary,
        } => json!(aliases.create_alias(&function, &alias, primary)?),
        Request::UpdateAlias {
            function,
            alias,
            primary,
            secondary,
            weight,
        } => json!(aliases.update_alias(&function, &alias, primary, secondary, weight)?),
        Request::GetAlias { function, alias } => json!(aliases.resolve(&function, &alias)?),
        Request::ListAliases { function } => json!(aliases.list_aliases(&function)?),
        Request::DeleteAlias { function, alias } => {
            aliases.delete_alias(&function, &alias)?;
            json!({ "deleted": alias })
        }
        Request::SetReservedConcurrency { function, limit } => {
            let mode = gateway.set_reserved_limit(&function, limit)?;
            json!({ "function": function, "mode": mode.to_string() })
        }
        Request::RemoveReservedConcurrency { function } => {
            gateway.remove_reservation(&function)?;
            json!({ "function": function, "mode": governor.mode(&function)?.to_string() })
        }
        Request::GetConcurrency { function } => json!({
            "function": function,
            "mode": governor.mode(&function)?.to_string(),
            "in_flight": governor.in_flight(&function)?,
            "unreserved_capacity": governor.unreserved_capacity(),
        }),
        Request::Invoke { function, alias } => {
            let invocation = match &alias {
                Some(alias) => gateway.begin_invocation_with_retry(&function, alias, retry, rng)?,
                None => gateway.invoke_latest_with_retry(&function, retry, rng)?,
            };
            let version = invocation
                .version_id()
                .map(|id| id.to_string())
                .unwrap_or_else(|| LATEST.to_string());
            let id = invocation.id;
            invocation.complete()?;
            json!({ "function": function, "version": version, "invocation": id })
        }
        Request::Metrics => gateway.metrics().to_json(),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RoutingError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn run(gateway: &Gateway, line: &str) -> RoutingResult<Value> {
        let request: Request = serde_json::from_str(line).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        apply(gateway, request, &RetryPolicy::none(), &mut rng)
    }

    #[test]
    fn test_parse_tagged_request() {
        let request: Request = serde_json::from_str(
            r#"{"op": "update_alias", "function": "orders", "alias": "PROD", "primary": 1, "secondary": 2, "weight": 0.5}"#,
        )
        .unwrap();
        assert!(request.is_mutation());
        assert_eq!(
            request,
            Request::UpdateAlias {
                function: "orders".into(),
                alias: "PROD".into(),
                primary: 1,
                secondary: Some(2),
                weight: Some(0.5),
            }
        );
    }

    #[test]
    fn test_read_only_requests() {
        let request: Request = serde_json::from_str(r#"{"op": "metrics"}"#).unwrap();
        assert!(!request.is_mutation());
        let request: Request =
            serde_json::from_str(r#"{"op": "invoke", "function": "orders"}"#).unwrap();
        assert!(!request.is_mutation());
    }

    #[test]
    fn test_canary_flow() {
        let gateway = Gateway::new(10);
        run(&gateway, r#"{"op": "create_function", "function": "orders", "code_ref": "v1"}"#).unwrap();
        let published = run(&gateway, r#"{"op": "publish", "function": "orders"}"#).unwrap();
        assert_eq!(published["version_id"], 1);

        run(&gateway, r#"{"op": "create_alias", "function": "orders", "alias": "PROD", "primary": 1}"#).unwrap();
        run(&gateway, r#"{"op": "update_latest", "function": "orders", "code_ref": "v2"}"#).unwrap();
        run(&gateway, r#"{"op": "publish", "function": "orders"}"#).unwrap();

        let routing = run(
            &gateway,
            r#"{"op": "update_alias", "function": "orders", "alias": "PROD", "primary": 1, "secondary": 2, "weight": 1.0}"#,
        )
        .unwrap();
        assert_eq!(routing["secondary_version_id"], 2);

        let invoked = run(&gateway, r#"{"op": "invoke", "function": "orders", "alias": "PROD"}"#).unwrap();
        assert_eq!(invoked["version"], "2");

        let concurrency = run(&gateway, r#"{"op": "get_concurrency", "function": "orders"}"#).unwrap();
        assert_eq!(concurrency["in_flight"], 0);
    }

    #[test]
    fn test_delete_latest_rejected() {
        let gateway = Gateway::new(10);
        run(&gateway, r#"{"op": "create_function", "function": "orders", "code_ref": "v1"}"#).unwrap();

        let err = run(
            &gateway,
            r#"{"op": "delete_version", "function": "orders", "qualifier": "$LATEST"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RoutingError::InvalidArgument(_)));
    }

    #[test]
    fn test_reservation_for_unknown_function() {
        let gateway = Gateway::new(10);
        let err = run(
            &gateway,
            r#"{"op": "set_reserved_concurrency", "function": "typo", "limit": 10}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RoutingError::NotFound(_)));
        assert_eq!(gateway.governor().unreserved_capacity(), 10);
        assert!(gateway.snapshot().unwrap().concurrency.reserved.is_empty());

        let err = run(
            &gateway,
            r#"{"op": "remove_reserved_concurrency", "function": "typo"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RoutingError::NotFound(_)));
    }

    #[test]
    fn test_invoke_latest() {
        let gateway = Gateway::new(10);
        run(&gateway, r#"{"op": "create_function", "function": "orders", "code_ref": "v1"}"#).unwrap();

        let invoked = run(&gateway, r#"{"op": "invoke", "function": "orders"}"#).unwrap();
        assert_eq!(invoked["version"], LATEST);
        assert_eq!(gateway.metrics().function("orders").released, 1);
    }

    #[test]
    fn test_invoke_latest_throttled() {
        let gateway = Gateway::new(10);
        run(&gateway, r#"{"op": "create_function", "function": "orders", "code_ref": "v1"}"#).unwrap();
        run(&gateway, r#"{"op": "set_reserved_concurrency", "function": "orders", "limit": 1}"#).unwrap();
        run(&gateway, r#"{"op": "set_reserved_concurrency", "function": "orders", "limit": 0}"#).unwrap();

        let err = run(&gateway, r#"{"op": "invoke", "function": "orders"}"#).unwrap_err();
        assert!(err.is_throttle());
    }
}
