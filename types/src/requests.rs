// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Change requests: the caller's input to planning
//!
//! A request arrives as loose JSON and must match exactly one of seven
//! accepted shapes.  Shape checking is done here, by hand, rather than with
//! an untagged serde enum: every problem in every submitted request must be
//! reported, and serde stops at the first.  Normalization (resolving the
//! names to full objects) happens later, in the plan builder, against the
//! inventory snapshot.

use serde::Serialize;
use serde_json::Value;
use updateadm_common::error::{ValidationError, ValidationIssue};
use uuid::Uuid;

/// A well-formed change request.  The seven variants correspond one-to-one
/// with the accepted input shapes.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChangeRequest {
    UpdateService {
        service: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        image: Option<Uuid>,
    },
    #[serde(rename = "update-instance")]
    UpdateInstanceByUuid {
        uuid: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        image: Option<Uuid>,
    },
    #[serde(rename = "update-instance")]
    UpdateInstanceByAlias {
        alias: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        image: Option<Uuid>,
    },
    CreateInstance {
        service: String,
        server: String,
    },
    /// agent instances are identified by (service, server)
    #[serde(rename = "delete-instance")]
    DeleteAgentInstance {
        service: String,
        server: String,
    },
    /// vm instances are identified directly
    #[serde(rename = "delete-instance")]
    DeleteVmInstance {
        instance: String,
    },
    DeleteService {
        service: String,
    },
}

/// Validate a full list of submitted change requests, accumulating every
/// problem found across all of them.
pub fn parse_change_requests(
    values: &[Value],
) -> Result<Vec<ChangeRequest>, ValidationError> {
    let mut requests = Vec::with_capacity(values.len());
    let mut issues = Vec::new();
    for (index, value) in values.iter().enumerate() {
        match parse_one(index, value) {
            Ok(request) => requests.push(request),
            Err(mut found) => issues.append(&mut found),
        }
    }
    if issues.is_empty() {
        Ok(requests)
    } else {
        Err(ValidationError { issues })
    }
}

fn parse_one(
    index: usize,
    value: &Value,
) -> Result<ChangeRequest, Vec<ValidationIssue>> {
    let Some(obj) = value.as_object() else {
        return Err(vec![ValidationIssue::new(
            index,
            "change request must be an object",
        )]);
    };

    let mut check = ShapeCheck::new(index, obj);
    let Some(change_type) = check.required_str("type") else {
        return Err(check.issues);
    };

    let request = match change_type.as_str() {
        "update-service" => {
            let service = check.required_str("service");
            let image = check.optional_uuid("image");
            check.finish(&["type", "service", "image"]);
            service.map(|service| ChangeRequest::UpdateService {
                service,
                image: image.flatten(),
            })
        }
        "update-instance" => {
            let uuid = check.optional_str("uuid");
            let alias = check.optional_str("alias");
            let image = check.optional_uuid("image");
            check.finish(&["type", "uuid", "alias", "image"]);
            match (uuid, alias) {
                (Some(Some(uuid)), Some(None)) => {
                    Some(ChangeRequest::UpdateInstanceByUuid {
                        uuid,
                        image: image.flatten(),
                    })
                }
                (Some(None), Some(Some(alias))) => {
                    Some(ChangeRequest::UpdateInstanceByAlias {
                        alias,
                        image: image.flatten(),
                    })
                }
                (Some(Some(_)), Some(Some(_))) => {
                    check.issue(
                        "\"uuid\" and \"alias\" are mutually exclusive",
                    );
                    None
                }
                (Some(None), Some(None)) => {
                    check.issue(
                        "update-instance requires \"uuid\" or \"alias\"",
                    );
                    None
                }
                // a type error was already recorded for the bad field
                _ => None,
            }
        }
        "create-instance" => {
            let service = check.required_str("service");
            let server = check.required_str("server");
            check.finish(&["type", "service", "server"]);
            match (service, server) {
                (Some(service), Some(server)) => {
                    Some(ChangeRequest::CreateInstance { service, server })
                }
                _ => None,
            }
        }
        "delete-instance" => {
            let instance = check.optional_str("instance");
            let service = check.optional_str("service");
            let server = check.optional_str("server");
            check.finish(&["type", "instance", "service", "server"]);
            match (instance, service, server) {
                (Some(Some(instance)), Some(None), Some(None)) => {
                    Some(ChangeRequest::DeleteVmInstance { instance })
                }
                (Some(None), Some(Some(service)), Some(Some(server))) => {
                    Some(ChangeRequest::DeleteAgentInstance {
                        service,
                        server,
                    })
                }
                (Some(None), Some(None), Some(None)) => {
                    check.issue(
                        "delete-instance requires \"instance\" or \
                         \"service\" and \"server\"",
                    );
                    None
                }
                (Some(Some(_)), _, _) => {
                    check.issue(
                        "\"instance\" excludes \"service\" and \"server\"",
                    );
                    None
                }
                _ => None,
            }
        }
        "delete-service" => {
            let service = check.required_str("service");
            check.finish(&["type", "service"]);
            service.map(|service| ChangeRequest::DeleteService { service })
        }
        other => {
            check.issue(format!("unknown change type: \"{}\"", other));
            None
        }
    };

    match request {
        Some(request) if check.issues.is_empty() => Ok(request),
        _ => {
            if check.issues.is_empty() {
                // field type errors were recorded individually above
                check.issue("change request did not match any known shape");
            }
            Err(check.issues)
        }
    }
}

/// Accumulates shape problems for one change request.
struct ShapeCheck<'a> {
    index: usize,
    obj: &'a serde_json::Map<String, Value>,
    issues: Vec<ValidationIssue>,
}

impl<'a> ShapeCheck<'a> {
    fn new(index: usize, obj: &'a serde_json::Map<String, Value>) -> Self {
        ShapeCheck { index, obj, issues: Vec::new() }
    }

    fn issue(&mut self, message: impl Into<String>) {
        self.issues.push(ValidationIssue::new(self.index, message));
    }

    fn required_str(&mut self, key: &str) -> Option<String> {
        match self.obj.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                self.issue(format!("\"{}\" must be a string", key));
                None
            }
            None => {
                self.issue(format!("missing required field \"{}\"", key));
                None
            }
        }
    }

    /// `None` means the field had the wrong type (an issue was recorded);
    /// `Some(None)` means it was absent.
    fn optional_str(&mut self, key: &str) -> Option<Option<String>> {
        match self.obj.get(key) {
            Some(Value::String(s)) => Some(Some(s.clone())),
            Some(_) => {
                self.issue(format!("\"{}\" must be a string", key));
                None
            }
            None => Some(None),
        }
    }

    fn optional_uuid(&mut self, key: &str) -> Option<Option<Uuid>> {
        match self.optional_str(key)? {
            Some(s) => match s.parse::<Uuid>() {
                Ok(uuid) => Some(Some(uuid)),
                Err(_) => {
                    self.issue(format!("\"{}\" must be a uuid", key));
                    None
                }
            },
            None => Some(None),
        }
    }

    /// Record an issue for every field outside the shape's allowed set.
    fn finish(&mut self, allowed: &[&str]) {
        let unexpected: Vec<_> = self
            .obj
            .keys()
            .filter(|k| !allowed.contains(&k.as_str()))
            .cloned()
            .collect();
        for key in unexpected {
            self.issue(format!("unexpected field \"{}\"", key));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accepts_all_seven_shapes() {
        let image = "3d41a721-19b7-4454-a853-6575679a0881";
        let values = vec![
            json!({"type": "update-service", "service": "cnapi"}),
            json!({"type": "update-service", "service": "vmapi",
                   "image": image}),
            json!({"type": "update-instance", "uuid":
                   "6d3b2d5e-17d4-4fd9-9a4a-eb6e8446c257"}),
            json!({"type": "update-instance", "alias": "cnapi0"}),
            json!({"type": "create-instance", "service": "moray",
                   "server": "headnode"}),
            json!({"type": "delete-instance", "service": "cmon-agent",
                   "server": "headnode"}),
            json!({"type": "delete-instance", "instance":
                   "6d3b2d5e-17d4-4fd9-9a4a-eb6e8446c257"}),
            json!({"type": "delete-service", "service": "ca"}),
        ];
        let requests = parse_change_requests(&values).unwrap();
        assert_eq!(requests.len(), 8);
        assert_eq!(
            requests[1],
            ChangeRequest::UpdateService {
                service: "vmapi".to_string(),
                image: Some(image.parse().unwrap()),
            }
        );
        assert!(matches!(
            requests[3],
            ChangeRequest::UpdateInstanceByAlias { .. }
        ));
        assert!(matches!(
            requests[5],
            ChangeRequest::DeleteAgentInstance { .. }
        ));
        assert!(matches!(requests[6], ChangeRequest::DeleteVmInstance { .. }));
    }

    #[test]
    fn test_rejects_unknown_keys_and_accumulates() {
        let values = vec![
            json!({"type": "update-service", "service": "cnapi",
                   "server": "headnode"}),
            json!({"type": "bounce-service", "service": "cnapi"}),
            json!({"type": "update-service", "service": 42}),
        ];
        let error = parse_change_requests(&values).unwrap_err();
        let messages: Vec<_> =
            error.issues.iter().map(|i| i.to_string()).collect();
        assert_eq!(
            messages,
            vec![
                "change 0: unexpected field \"server\"",
                "change 1: unknown change type: \"bounce-service\"",
                "change 2: \"service\" must be a string",
            ]
        );
    }

    #[test]
    fn test_update_instance_requires_exactly_one_selector() {
        let values = vec![
            json!({"type": "update-instance"}),
            json!({"type": "update-instance", "uuid": "x", "alias": "y"}),
        ];
        let error = parse_change_requests(&values).unwrap_err();
        assert_eq!(error.issues.len(), 2);
        assert!(error.issues[0]
            .message
            .contains("requires \"uuid\" or \"alias\""));
        assert!(error.issues[1].message.contains("mutually exclusive"));
    }

    #[test]
    fn test_delete_instance_shape_exclusivity() {
        let values = vec![json!({
            "type": "delete-instance",
            "instance": "z0",
            "service": "cnapi",
        })];
        let error = parse_change_requests(&values).unwrap_err();
        assert!(error.issues[0].message.contains("excludes"));
    }
}
