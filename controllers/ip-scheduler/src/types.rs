//! kube-scheduler extender v1 wire types
//!
//! Field names follow the scheduler's Go structs, which carry no JSON
//! tags, hence PascalCase.

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Items of a `v1.NodeList`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeList {
    #[serde(default)]
    pub items: Vec<Node>,
}

/// Filter call: the pod and its candidate nodes. The scheduler sends
/// `NodeNames` when the extender is `nodeCacheCapable`, `Nodes` otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtenderArgs {
    #[serde(default)]
    pub pod: Option<Pod>,
    #[serde(default)]
    pub nodes: Option<NodeList>,
    #[serde(default)]
    pub node_names: Option<Vec<String>>,
}

impl ExtenderArgs {
    /// Candidate node names, whichever form they came in.
    pub fn candidates(&self) -> Vec<String> {
        match (&self.node_names, &self.nodes) {
            (Some(names), _) => names.clone(),
            (None, Some(nodes)) => nodes.items.iter().map(|n| n.name_any()).collect(),
            (None, None) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtenderFilterResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<NodeList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_names: Option<Vec<String>>,
    /// Rejected node -> reason
    #[serde(default)]
    pub failed_nodes: BTreeMap<String, String>,
    #[serde(default)]
    pub error: String,
}

impl ExtenderFilterResult {
    /// Answer in the same form as `args`, keeping only `passed` nodes.
    pub fn answer(args: &ExtenderArgs, passed: &[String], failed_nodes: BTreeMap<String, String>) -> Self {
        let (nodes, node_names) = match (&args.node_names, &args.nodes) {
            (None, Some(list)) => (
                Some(NodeList {
                    items: list
                        .items
                        .iter()
                        .filter(|n| passed.contains(&n.name_any()))
                        .cloned()
                        .collect(),
                }),
                None,
            ),
            _ => (None, Some(passed.to_vec())),
        };
        Self {
            nodes,
            node_names,
            failed_nodes,
            error: String::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            ..Default::default()
        }
    }
}

/// Bind call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtenderBindingArgs {
    pub pod_name: String,
    pub pod_namespace: String,
    #[serde(rename = "PodUID", default)]
    pub pod_uid: String,
    pub node: String,
}

impl ExtenderBindingArgs {
    /// `namespace/pod`
    pub fn pod_key(&self) -> String {
        format!("{}/{}", self.pod_namespace, self.pod_name)
    }
}

/// Bind result; an empty `Error` means bound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExtenderBindingResult {
    #[serde(default)]
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_args_from_scheduler_json() {
        let args: ExtenderArgs = serde_json::from_value(json!({
            "Pod": { "metadata": { "name": "web-0", "namespace": "default" } },
            "NodeNames": ["node-1", "node-2"]
        }))
        .unwrap();
        assert_eq!(args.pod.unwrap().name_any(), "web-0");
        assert_eq!(args.node_names.unwrap(), vec!["node-1", "node-2"]);

        let args: ExtenderArgs = serde_json::from_value(json!({
            "Pod": { "metadata": { "name": "web-0" } },
            "Nodes": { "apiVersion": "v1", "kind": "NodeList", "items": [ { "metadata": { "name": "node-3" } } ] }
        }))
        .unwrap();
        assert_eq!(args.candidates(), vec!["node-3"]);
    }

    #[test]
    fn test_binding_args_use_pod_uid_field() {
        let args: ExtenderBindingArgs = serde_json::from_value(json!({
            "PodName": "web-0",
            "PodNamespace": "default",
            "PodUID": "uid-1",
            "Node": "node-1"
        }))
        .unwrap();
        assert_eq!(args.pod_uid, "uid-1");
        assert_eq!(args.pod_key(), "default/web-0");
    }

    #[test]
    fn test_filter_result_answers_in_request_form() {
        let args = ExtenderArgs {
            node_names: Some(vec!["node-1".to_string(), "node-2".to_string()]),
            ..Default::default()
        };
        let failed = BTreeMap::from([("node-2".to_string(), "full".to_string())]);
        let result = ExtenderFilterResult::answer(&args, &["node-1".to_string()], failed);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["NodeNames"], json!(["node-1"]));
        assert_eq!(json["FailedNodes"]["node-2"], "full");
        assert!(json.get("Nodes").is_none());
    }
}
