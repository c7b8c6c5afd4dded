//! Notification template registry
//!
//! Maps approved template names to their ordered body variables and builds
//! the component structure the provider send API expects.

use serde_json::{json, Value};
use std::collections::HashMap;

/// An approved message template and the order of its body variables
#[derive(Debug, Clone)]
pub struct Template {
    pub name: &'static str,
    pub variable_order: &'static [&'static str],
}

impl Template {
    /// Build the template components: one body component with the variables
    /// in declaration order. Missing variables become empty strings so a
    /// sparse payload still renders.
    pub fn build_components(&self, variables: &HashMap<String, String>) -> Value {
        let parameters: Vec<Value> = self
            .variable_order
            .iter()
            .map(|name| {
                json!({
                    "type": "text",
                    "text": variables.get(*name).cloned().unwrap_or_default(),
                })
            })
            .collect();

        json!([{ "type": "body", "parameters": parameters }])
    }
}

const TEMPLATES: &[Template] = &[
    Template {
        name: "quote_created_template",
        variable_order: &["customer_name", "quote_number", "total_value"],
    },
    Template {
        name: "quote_sent_template",
        variable_order: &["customer_name", "quote_number", "total_value"],
    },
    Template {
        name: "order_created_template",
        variable_order: &["customer_name", "order_number"],
    },
    Template {
        name: "order_status_template",
        variable_order: &["customer_name", "order_number", "status"],
    },
    Template {
        name: "delivery_started_template",
        variable_order: &["customer_name", "order_number", "estimated_time"],
    },
    Template {
        name: "delivery_completed_template",
        variable_order: &["customer_name", "order_number"],
    },
];

/// Look up a template by name
pub fn get(name: &str) -> Option<&'static Template> {
    TEMPLATES.iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_templates_resolve() {
        assert!(get("order_status_template").is_some());
        assert!(get("no_such_template").is_none());
    }

    #[test]
    fn test_components_follow_variable_order() {
        let template = get("order_status_template").unwrap();
        let mut vars = HashMap::new();
        vars.insert("customer_name".to_string(), "Maria".to_string());
        vars.insert("order_number".to_string(), "PED-42".to_string());
        vars.insert("status".to_string(), "em entrega".to_string());

        let components = template.build_components(&vars);
        let parameters = components[0]["parameters"].as_array().unwrap();
        assert_eq!(parameters.len(), 3);
        assert_eq!(parameters[0]["text"], "Maria");
        assert_eq!(parameters[1]["text"], "PED-42");
        assert_eq!(parameters[2]["text"], "em entrega");
    }

    #[test]
    fn test_missing_variables_render_empty() {
        let template = get("order_created_template").unwrap();
        let components = template.build_components(&HashMap::new());
        let parameters = components[0]["parameters"].as_array().unwrap();
        assert_eq!(parameters[0]["text"], "");
    }
}
