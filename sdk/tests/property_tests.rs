use proptest::prelude::*;
use sdk::errors::{EngineError, ParleyErrorExt};
use sdk::types::ToolArgs;

// User hints must stay static and never echo the diagnostic detail carried
// by the error itself.
proptest! {
    #[test]
    fn test_error_user_hint_completeness(detail in "[a-zA-Z0-9_./:]{8,40}") {
        let errs = vec![
            EngineError::Config(detail.clone()),
            EngineError::Database(detail.clone()),
            EngineError::LLMProvider(detail.clone()),
            EngineError::ToolNotFound(detail.clone()),
            EngineError::ToolError(detail.clone()),
            EngineError::Proxy(detail.clone()),
            EngineError::InvalidArguments(detail.clone()),
            EngineError::MalformedDescriptor { name: detail.clone(), reason: detail.clone() },
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&detail));
        }
    }
}

// Any JSON object the model produces parses into arguments that expose the
// same string values.
proptest! {
    #[test]
    fn test_tool_args_parse_object(
        key in "[a-z_]{1,12}",
        value in "[a-zA-Z0-9 ]{0,30}",
    ) {
        let raw = serde_json::json!({ key.clone(): value.clone() }).to_string();
        let args = ToolArgs::from_json_str(&raw).expect("object should parse");
        prop_assert_eq!(args.param_str(&key).expect("key present"), value);
    }
}

proptest! {
    #[test]
    fn test_tool_args_reject_scalars(n in any::<i64>()) {
        prop_assert!(ToolArgs::from_json_str(&n.to_string()).is_err());
    }
}
