//! AWS API client implementation.
//!
//! Auto Scaling and EC2 are reached through their XML query APIs;
//! `CodeDeploy` through its JSON 1.1 target API. Every request is signed with
//! Signature Version 4.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use super::models::{
    AsgInstance, AutoScalingGroup, CreateDeploymentInput, CreateDeploymentOutput,
    CreateVpcResponse, DescribeAutoScalingGroupsResponse, DescribeLaunchConfigurationsResponse,
    DescribeVpcsResponse, Ec2ErrorResponse, GetDeploymentInput, GetDeploymentOutput,
    GitHubLocation, JsonErrorResponse, ListApplicationsOutput, ListDeploymentConfigsOutput,
    ListDeploymentGroupsInput, ListDeploymentGroupsOutput, ListDeploymentsOutput,
    QueryErrorResponse, RevisionLocation,
};
use super::signing::{sign, Credentials, Scope};
use crate::providers::deployments::{
    CreateDeploymentRequest, DeploymentGroupSummary, DeploymentService, DeploymentState,
};
use crate::providers::traits::{
    Capacity, CloudApiError, CloudControlPlane, GroupDescription, GroupInstance, GroupSpec,
    InstanceHealth, LaunchConfigRecord, LaunchConfigSpec, VpcSpec,
};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Auto Scaling API version.
const AUTOSCALING_VERSION: &str = "2011-01-01";

/// EC2 API version.
const EC2_VERSION: &str = "2016-11-15";

/// `CodeDeploy` JSON target prefix.
const CODEDEPLOY_TARGET: &str = "CodeDeploy_20141006";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=utf-8";
const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// AWS provider.
#[derive(Clone)]
pub struct Aws {
    /// HTTP client.
    client: Client,
    /// Signing credentials.
    credentials: Credentials,
    /// AWS region.
    region: String,
    /// Override for every service endpoint (local stacks, tests).
    endpoint_override: Option<String>,
}

impl Aws {
    /// Create a new AWS provider.
    ///
    /// # Arguments
    /// * `access_key_id` - AWS access key ID
    /// * `secret_access_key` - AWS secret access key
    /// * `region` - AWS region (e.g., "us-east-1")
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Result<Self, CloudApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(CloudApiError::Http)?;

        Ok(Self {
            client,
            credentials: Credentials {
                access_key_id: access_key_id.into(),
                secret_access_key: secret_access_key.into(),
                session_token: None,
            },
            region: region.into(),
            endpoint_override: None,
        })
    }

    /// Create a provider from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`,
    /// plus `AWS_SESSION_TOKEN` for temporary credentials.
    ///
    /// # Errors
    /// Returns error if a credential variable is missing.
    pub fn from_env(region: impl Into<String>) -> Result<Self, CloudApiError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| CloudApiError::Config("AWS_ACCESS_KEY_ID not set".to_string()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| CloudApiError::Config("AWS_SECRET_ACCESS_KEY not set".to_string()))?;
        let aws = Self::new(access_key_id, secret_access_key, region)?;
        Ok(match std::env::var("AWS_SESSION_TOKEN") {
            Ok(token) if !token.is_empty() => aws.with_session_token(token),
            _ => aws,
        })
    }

    /// Sign requests with a session token (temporary credentials).
    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.credentials.session_token = Some(token.into());
        self
    }

    /// Send every request to `endpoint` instead of the regional endpoints.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    /// Get the endpoint for a service.
    fn endpoint(&self, service: &str) -> String {
        self.endpoint_override
            .clone()
            .unwrap_or_else(|| format!("https://{service}.{}.amazonaws.com", self.region))
    }

    /// Execute a query API action and decode its XML result.
    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        service: &str,
        version: &str,
        action: &str,
        params: &[(String, String)],
    ) -> Result<T, CloudApiError> {
        let text = self.query_action(service, version, action, params).await?;
        quick_xml::de::from_str(&text).map_err(|e| {
            warn!(action = %action, error = %e, body = %text, "Failed to parse response");
            CloudApiError::Xml(e)
        })
    }

    /// Execute a query API action whose result carries nothing but metadata.
    async fn query_action(
        &self,
        service: &str,
        version: &str,
        action: &str,
        params: &[(String, String)],
    ) -> Result<String, CloudApiError> {
        debug!(service = %service, action = %action, "AWS query request");

        let body = {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            form.append_pair("Action", action);
            form.append_pair("Version", version);
            for (key, value) in params {
                form.append_pair(key, value);
            }
            form.finish()
        };

        self.send(service, &[("content-type", FORM_CONTENT_TYPE)], body.into_bytes())
            .await
    }

    /// Execute a `CodeDeploy` JSON action.
    async fn codedeploy<T: serde::de::DeserializeOwned>(
        &self,
        action: &str,
        body: &impl serde::Serialize,
    ) -> Result<T, CloudApiError> {
        debug!(action = %action, "CodeDeploy request");

        let target = format!("{CODEDEPLOY_TARGET}.{action}");
        let text = self
            .send(
                "codedeploy",
                &[
                    ("content-type", JSON_CONTENT_TYPE),
                    ("x-amz-target", target.as_str()),
                ],
                serde_json::to_vec(body)?,
            )
            .await?;

        serde_json::from_str(&text).map_err(|e| {
            warn!(action = %action, error = %e, body = %text, "Failed to parse response");
            CloudApiError::Serialization(e)
        })
    }

    /// Sign and send a `POST` to a service, returning the body of a
    /// successful response.
    async fn send(
        &self,
        service: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<String, CloudApiError> {
        let endpoint = self.endpoint(service);
        let url = Url::parse(&endpoint)
            .map_err(|e| CloudApiError::Config(format!("Invalid endpoint {endpoint}: {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(CloudApiError::Config(format!(
                    "Endpoint {endpoint} has no host"
                )))
            }
        };

        let mut signed_headers = vec![("host", host.as_str())];
        signed_headers.extend_from_slice(headers);
        let signed = sign(
            &self.credentials,
            Scope {
                region: &self.region,
                service,
            },
            &signed_headers,
            &body,
            chrono::Utc::now(),
        )?;

        let mut request = self
            .client
            .post(url)
            .header("x-amz-date", signed.amz_date)
            .header(AUTHORIZATION, signed.authorization);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(token) = signed.security_token {
            request = request.header("x-amz-security-token", token);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            Ok(text)
        } else {
            Err(Self::classify_error(status, &text))
        }
    }

    /// Map an error response onto [`CloudApiError`].
    fn classify_error(status: StatusCode, body: &str) -> CloudApiError {
        let (code, message) = if let Ok(err) = quick_xml::de::from_str::<QueryErrorResponse>(body)
        {
            (err.error.code, err.error.message)
        } else if let Some(err) = quick_xml::de::from_str::<Ec2ErrorResponse>(body)
            .ok()
            .and_then(|r| r.errors.error.into_iter().next())
        {
            (err.code, err.message)
        } else if let Ok(err) = serde_json::from_str::<JsonErrorResponse>(body) {
            // "com.amazonaws.codedeploy#ApplicationDoesNotExistException"
            let code = err
                .error_type
                .rsplit('#')
                .next()
                .unwrap_or(&err.error_type)
                .to_string();
            (code, err.message)
        } else {
            (String::new(), body.to_string())
        };

        let detail = if code.is_empty() {
            message.clone()
        } else {
            format!("{code}: {message}")
        };

        match code.as_str() {
            "Throttling" | "ThrottlingException" | "RequestLimitExceeded" => {
                return CloudApiError::Throttled(detail)
            }
            "ResourceInUse" => return CloudApiError::InUse(detail),
            "AlreadyExists" => return CloudApiError::AlreadyExists(detail),
            c if c.ends_with("DoesNotExistException") => return CloudApiError::NotFound(detail),
            _ => {}
        }

        if status == StatusCode::NOT_FOUND {
            CloudApiError::NotFound(detail)
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            CloudApiError::Auth(detail)
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            CloudApiError::Throttled(detail)
        } else if status.is_server_error() {
            CloudApiError::Unavailable {
                status: status.as_u16(),
                message: detail,
            }
        } else {
            CloudApiError::Api {
                status: status.as_u16(),
                message: detail,
            }
        }
    }

    /// Convert an Auto Scaling group to our type.
    fn to_group(asg: &AutoScalingGroup) -> GroupDescription {
        GroupDescription {
            name: asg.name.clone(),
            launch_config: asg.launch_configuration_name.clone(),
            capacity: Capacity::new(asg.min_size, asg.max_size, asg.desired_capacity),
            instances: asg.instances.member.iter().map(Self::to_instance).collect(),
            created_at: parse_time(asg.created_time.as_deref()),
        }
    }

    /// Convert a group member to our type.
    fn to_instance(instance: &AsgInstance) -> GroupInstance {
        let health = if instance.lifecycle_state.starts_with("Terminat") {
            InstanceHealth::Terminating
        } else if instance.lifecycle_state == "InService" && instance.health_status == "Healthy"
        {
            InstanceHealth::Healthy
        } else {
            InstanceHealth::Unhealthy
        };

        GroupInstance {
            id: instance.instance_id.clone(),
            health,
            launch_config: instance.launch_configuration_name.clone(),
        }
    }
}

/// Parse an RFC 3339 timestamp from the API.
fn parse_time(s: Option<&str>) -> Option<chrono::DateTime<chrono::Utc>> {
    s.and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Build an indexed member list parameter (`Prefix.member.N`).
fn member_params(prefix: &str, values: &[String]) -> Vec<(String, String)> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("{prefix}.member.{}", i + 1), v.clone()))
        .collect()
}

/// `NextToken` parameter for a follow-up page.
fn page_params(next_token: Option<&str>) -> Vec<(String, String)> {
    next_token
        .map(|token| vec![("NextToken".to_string(), token.to_string())])
        .unwrap_or_default()
}

fn capacity_params(capacity: Capacity) -> Vec<(String, String)> {
    vec![
        ("MinSize".to_string(), capacity.min.to_string()),
        ("MaxSize".to_string(), capacity.max.to_string()),
        ("DesiredCapacity".to_string(), capacity.desired.to_string()),
    ]
}

#[async_trait]
impl CloudControlPlane for Aws {
    // ========================================================================
    // Launch configuration operations
    // ========================================================================

    async fn register_launch_config(
        &self,
        spec: LaunchConfigSpec,
    ) -> Result<String, CloudApiError> {
        info!(
            name = %spec.name,
            image_id = %spec.image_id,
            instance_type = %spec.instance_type,
            "Creating launch configuration"
        );

        let mut params = vec![
            ("LaunchConfigurationName".to_string(), spec.name.clone()),
            ("ImageId".to_string(), spec.image_id),
            ("InstanceType".to_string(), spec.instance_type),
            (
                "UserData".to_string(),
                base64::Engine::encode(&base64::engine::general_purpose::STANDARD, spec.user_data),
            ),
        ];
        if let Some(key_name) = spec.key_name {
            params.push(("KeyName".to_string(), key_name));
        }
        if let Some(profile) = spec.instance_profile {
            params.push(("IamInstanceProfile".to_string(), profile));
        }
        params.extend(member_params("SecurityGroups", &spec.security_groups));

        self.query_action(
            "autoscaling",
            AUTOSCALING_VERSION,
            "CreateLaunchConfiguration",
            &params,
        )
        .await?;

        info!(name = %spec.name, "Launch configuration created");
        Ok(spec.name)
    }

    async fn delete_launch_config(&self, name: &str) -> Result<(), CloudApiError> {
        info!(name = %name, "Deleting launch configuration");

        self.query_action(
            "autoscaling",
            AUTOSCALING_VERSION,
            "DeleteLaunchConfiguration",
            &[("LaunchConfigurationName".to_string(), name.to_string())],
        )
        .await?;

        Ok(())
    }

    async fn list_launch_configs(
        &self,
        prefix: &str,
    ) -> Result<Vec<LaunchConfigRecord>, CloudApiError> {
        let mut records = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let response: DescribeLaunchConfigurationsResponse = self
                .query(
                    "autoscaling",
                    AUTOSCALING_VERSION,
                    "DescribeLaunchConfigurations",
                    &page_params(next_token.as_deref()),
                )
                .await?;

            records.extend(
                response
                    .result
                    .launch_configurations
                    .member
                    .into_iter()
                    .filter(|lc| lc.name.starts_with(prefix))
                    .map(|lc| LaunchConfigRecord {
                        created_at: parse_time(lc.created_time.as_deref()),
                        name: lc.name,
                    }),
            );

            next_token = response.result.next_token;
            if next_token.is_none() {
                return Ok(records);
            }
        }
    }

    // ========================================================================
    // Autoscaling group operations
    // ========================================================================

    async fn register_group(&self, spec: GroupSpec) -> Result<String, CloudApiError> {
        info!(
            name = %spec.name,
            launch_config = %spec.launch_config,
            capacity = %spec.capacity,
            "Creating autoscaling group"
        );

        let mut params = vec![
            ("AutoScalingGroupName".to_string(), spec.name.clone()),
            (
                "LaunchConfigurationName".to_string(),
                spec.launch_config.clone(),
            ),
            ("VPCZoneIdentifier".to_string(), spec.subnets.join(",")),
        ];
        params.extend(capacity_params(spec.capacity));
        for (i, (key, value)) in spec.tags.iter().enumerate() {
            let n = i + 1;
            params.push((format!("Tags.member.{n}.Key"), key.clone()));
            params.push((format!("Tags.member.{n}.Value"), value.clone()));
            params.push((format!("Tags.member.{n}.PropagateAtLaunch"), "true".into()));
        }

        self.query_action(
            "autoscaling",
            AUTOSCALING_VERSION,
            "CreateAutoScalingGroup",
            &params,
        )
        .await?;

        info!(name = %spec.name, "Autoscaling group created");
        Ok(spec.name)
    }

    async fn delete_group(&self, name: &str) -> Result<(), CloudApiError> {
        info!(name = %name, "Deleting autoscaling group");

        self.query_action(
            "autoscaling",
            AUTOSCALING_VERSION,
            "DeleteAutoScalingGroup",
            &[
                ("AutoScalingGroupName".to_string(), name.to_string()),
                ("ForceDelete".to_string(), "false".to_string()),
            ],
        )
        .await?;

        Ok(())
    }

    async fn set_desired_capacity(&self, name: &str, desired: u32) -> Result<(), CloudApiError> {
        info!(name = %name, desired, "Setting desired capacity");

        self.query_action(
            "autoscaling",
            AUTOSCALING_VERSION,
            "SetDesiredCapacity",
            &[
                ("AutoScalingGroupName".to_string(), name.to_string()),
                ("DesiredCapacity".to_string(), desired.to_string()),
                ("HonorCooldown".to_string(), "false".to_string()),
            ],
        )
        .await?;

        Ok(())
    }

    async fn update_capacity(&self, name: &str, capacity: Capacity) -> Result<(), CloudApiError> {
        info!(name = %name, capacity = %capacity, "Updating group capacity");

        let mut params = vec![("AutoScalingGroupName".to_string(), name.to_string())];
        params.extend(capacity_params(capacity));

        self.query_action(
            "autoscaling",
            AUTOSCALING_VERSION,
            "UpdateAutoScalingGroup",
            &params,
        )
        .await?;

        Ok(())
    }

    async fn describe_group(&self, name: &str) -> Result<GroupDescription, CloudApiError> {
        let response: DescribeAutoScalingGroupsResponse = self
            .query(
                "autoscaling",
                AUTOSCALING_VERSION,
                "DescribeAutoScalingGroups",
                &member_params("AutoScalingGroupNames", &[name.to_string()]),
            )
            .await?;

        response
            .result
            .groups
            .member
            .first()
            .map(Self::to_group)
            .ok_or_else(|| CloudApiError::NotFound(format!("Autoscaling group not found: {name}")))
    }

    async fn list_groups(&self, prefix: &str) -> Result<Vec<String>, CloudApiError> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let response: DescribeAutoScalingGroupsResponse = self
                .query(
                    "autoscaling",
                    AUTOSCALING_VERSION,
                    "DescribeAutoScalingGroups",
                    &page_params(next_token.as_deref()),
                )
                .await?;

            names.extend(
                response
                    .result
                    .groups
                    .member
                    .into_iter()
                    .map(|g| g.name)
                    .filter(|name| name.starts_with(prefix)),
            );

            next_token = response.result.next_token;
            if next_token.is_none() {
                return Ok(names);
            }
        }
    }

    fn supports_live_reattach(&self) -> bool {
        true
    }

    async fn attach_launch_config(
        &self,
        group: &str,
        launch_config: &str,
    ) -> Result<(), CloudApiError> {
        info!(group = %group, launch_config = %launch_config, "Rebinding launch configuration");

        self.query_action(
            "autoscaling",
            AUTOSCALING_VERSION,
            "UpdateAutoScalingGroup",
            &[
                ("AutoScalingGroupName".to_string(), group.to_string()),
                (
                    "LaunchConfigurationName".to_string(),
                    launch_config.to_string(),
                ),
            ],
        )
        .await?;

        Ok(())
    }

    // ========================================================================
    // Networking
    // ========================================================================

    async fn ensure_vpc(&self, spec: VpcSpec) -> Result<String, CloudApiError> {
        let existing: DescribeVpcsResponse = self
            .query(
                "ec2",
                EC2_VERSION,
                "DescribeVpcs",
                &[
                    ("Filter.1.Name".to_string(), "tag:Name".to_string()),
                    ("Filter.1.Value.1".to_string(), spec.cluster.clone()),
                ],
            )
            .await?;

        if let Some(vpc) = existing.vpcs.item.first() {
            debug!(cluster = %spec.cluster, vpc_id = %vpc.vpc_id, "VPC already exists");
            return Ok(vpc.vpc_id.clone());
        }

        info!(cluster = %spec.cluster, cidr = %spec.cidr_block, "Creating VPC");

        let created: CreateVpcResponse = self
            .query(
                "ec2",
                EC2_VERSION,
                "CreateVpc",
                &[
                    ("CidrBlock".to_string(), spec.cidr_block),
                    (
                        "TagSpecification.1.ResourceType".to_string(),
                        "vpc".to_string(),
                    ),
                    ("TagSpecification.1.Tag.1.Key".to_string(), "Name".to_string()),
                    ("TagSpecification.1.Tag.1.Value".to_string(), spec.cluster),
                ],
            )
            .await?;

        info!(vpc_id = %created.vpc.vpc_id, "VPC created");
        Ok(created.vpc.vpc_id)
    }
}

#[async_trait]
impl DeploymentService for Aws {
    async fn create_deployment(
        &self,
        req: CreateDeploymentRequest,
    ) -> Result<String, CloudApiError> {
        info!(
            application = %req.application,
            group = %req.group,
            revision = %req.revision,
            "Creating deployment"
        );

        let body = CreateDeploymentInput {
            application_name: req.application,
            deployment_group_name: req.group,
            revision: RevisionLocation {
                revision_type: "GitHub".to_string(),
                git_hub_location: GitHubLocation {
                    repository: req.repository,
                    commit_id: req.revision,
                },
            },
        };

        let output: CreateDeploymentOutput = self.codedeploy("CreateDeployment", &body).await?;

        info!(deployment_id = %output.deployment_id, "Deployment created");
        Ok(output.deployment_id)
    }

    async fn get_status(&self, deployment_id: &str) -> Result<DeploymentState, CloudApiError> {
        let output: GetDeploymentOutput = self
            .codedeploy(
                "GetDeployment",
                &GetDeploymentInput {
                    deployment_id: deployment_id.to_string(),
                },
            )
            .await?;

        Ok(DeploymentState::parse(&output.deployment_info.status))
    }

    async fn list_applications(&self) -> Result<Vec<String>, CloudApiError> {
        let output: ListApplicationsOutput = self
            .codedeploy("ListApplications", &serde_json::json!({}))
            .await?;
        Ok(output.applications)
    }

    async fn list_deployment_groups(
        &self,
        application: Option<&str>,
    ) -> Result<Vec<DeploymentGroupSummary>, CloudApiError> {
        let applications = match application {
            Some(app) => vec![app.to_string()],
            None => self.list_applications().await?,
        };

        let mut groups = Vec::new();
        for application_name in applications {
            let output: ListDeploymentGroupsOutput = self
                .codedeploy(
                    "ListDeploymentGroups",
                    &ListDeploymentGroupsInput { application_name },
                )
                .await?;
            groups.extend(output.deployment_groups.into_iter().map(|name| {
                DeploymentGroupSummary {
                    application: output.application_name.clone(),
                    name,
                }
            }));
        }

        Ok(groups)
    }

    async fn list_configs(&self) -> Result<Vec<String>, CloudApiError> {
        let output: ListDeploymentConfigsOutput = self
            .codedeploy("ListDeploymentConfigs", &serde_json::json!({}))
            .await?;
        Ok(output.deployment_configs_list)
    }

    async fn list_deployments(&self) -> Result<Vec<String>, CloudApiError> {
        let output: ListDeploymentsOutput = self
            .codedeploy("ListDeployments", &serde_json::json!({}))
            .await?;
        Ok(output.deployments)
    }
}
