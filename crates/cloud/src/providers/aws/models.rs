//! AWS API request and response models.
//!
//! Query API (Auto Scaling, EC2) responses are XML; `CodeDeploy` speaks JSON.

use serde::{Deserialize, Serialize};

// ============================================================================
// Query API list wrappers
// ============================================================================

/// `<member>` list used by the Auto Scaling query API.
#[derive(Debug, Clone, Deserialize)]
pub struct Members<T> {
    #[serde(rename = "member", default = "Vec::new")]
    pub member: Vec<T>,
}

impl<T> Default for Members<T> {
    fn default() -> Self {
        Self { member: Vec::new() }
    }
}

/// `<item>` list used by the EC2 query API.
#[derive(Debug, Clone, Deserialize)]
pub struct Items<T> {
    #[serde(rename = "item", default = "Vec::new")]
    pub item: Vec<T>,
}

impl<T> Default for Items<T> {
    fn default() -> Self {
        Self { item: Vec::new() }
    }
}

// ============================================================================
// Error envelopes
// ============================================================================

/// Error document returned by the Auto Scaling query API.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryErrorResponse {
    /// Error details.
    #[serde(rename = "Error")]
    pub error: QueryError,
}

/// Error document returned by the EC2 query API.
#[derive(Debug, Clone, Deserialize)]
pub struct Ec2ErrorResponse {
    #[serde(rename = "Errors")]
    pub errors: Ec2Errors,
}

/// EC2 error list.
#[derive(Debug, Clone, Deserialize)]
pub struct Ec2Errors {
    #[serde(rename = "Error", default)]
    pub error: Vec<QueryError>,
}

/// Error details.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryError {
    /// Error code (e.g. `ResourceInUse`, `Throttling`).
    #[serde(rename = "Code")]
    pub code: String,
    /// Human-readable message.
    #[serde(rename = "Message", default)]
    pub message: String,
}

/// Error document returned by the JSON APIs (`CodeDeploy`).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonErrorResponse {
    /// Fully-qualified error type.
    #[serde(rename = "__type")]
    pub error_type: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Auto Scaling types
// ============================================================================

/// `DescribeLaunchConfigurations` response.
#[derive(Debug, Clone, Deserialize)]
pub struct DescribeLaunchConfigurationsResponse {
    #[serde(rename = "DescribeLaunchConfigurationsResult")]
    pub result: DescribeLaunchConfigurationsResult,
}

/// One page of launch configurations.
#[derive(Debug, Clone, Deserialize)]
pub struct DescribeLaunchConfigurationsResult {
    /// Launch configurations.
    #[serde(rename = "LaunchConfigurations", default)]
    pub launch_configurations: Members<LaunchConfiguration>,
    /// Token for the next page.
    #[serde(rename = "NextToken", default)]
    pub next_token: Option<String>,
}

/// Launch configuration information.
#[derive(Debug, Clone, Deserialize)]
pub struct LaunchConfiguration {
    /// Launch configuration name.
    #[serde(rename = "LaunchConfigurationName")]
    pub name: String,
    /// Image ID.
    #[serde(rename = "ImageId", default)]
    pub image_id: Option<String>,
    /// Instance type.
    #[serde(rename = "InstanceType", default)]
    pub instance_type: Option<String>,
    /// Created at timestamp.
    #[serde(rename = "CreatedTime", default)]
    pub created_time: Option<String>,
}

/// `DescribeAutoScalingGroups` response.
#[derive(Debug, Clone, Deserialize)]
pub struct DescribeAutoScalingGroupsResponse {
    #[serde(rename = "DescribeAutoScalingGroupsResult")]
    pub result: DescribeAutoScalingGroupsResult,
}

/// One page of autoscaling groups.
#[derive(Debug, Clone, Deserialize)]
pub struct DescribeAutoScalingGroupsResult {
    /// Autoscaling groups.
    #[serde(rename = "AutoScalingGroups", default)]
    pub groups: Members<AutoScalingGroup>,
    /// Token for the next page.
    #[serde(rename = "NextToken", default)]
    pub next_token: Option<String>,
}

/// Autoscaling group information.
#[derive(Debug, Clone, Deserialize)]
pub struct AutoScalingGroup {
    /// Group name.
    #[serde(rename = "AutoScalingGroupName")]
    pub name: String,
    /// Bound launch configuration.
    #[serde(rename = "LaunchConfigurationName", default)]
    pub launch_configuration_name: Option<String>,
    /// Minimum size.
    #[serde(rename = "MinSize")]
    pub min_size: u32,
    /// Maximum size.
    #[serde(rename = "MaxSize")]
    pub max_size: u32,
    /// Desired capacity.
    #[serde(rename = "DesiredCapacity")]
    pub desired_capacity: u32,
    /// Member instances.
    #[serde(rename = "Instances", default)]
    pub instances: Members<AsgInstance>,
    /// Created at timestamp.
    #[serde(rename = "CreatedTime", default)]
    pub created_time: Option<String>,
}

/// Group member instance.
#[derive(Debug, Clone, Deserialize)]
pub struct AsgInstance {
    /// Instance ID.
    #[serde(rename = "InstanceId")]
    pub instance_id: String,
    /// `Healthy` or `Unhealthy`.
    #[serde(rename = "HealthStatus")]
    pub health_status: String,
    /// Lifecycle state (`Pending`, `InService`, `Terminating`, ...).
    #[serde(rename = "LifecycleState")]
    pub lifecycle_state: String,
    /// Launch configuration the instance was started from.
    #[serde(rename = "LaunchConfigurationName", default)]
    pub launch_configuration_name: Option<String>,
}

// ============================================================================
// EC2 (VPC) types
// ============================================================================

/// `DescribeVpcs` response.
#[derive(Debug, Clone, Deserialize)]
pub struct DescribeVpcsResponse {
    /// VPCs.
    #[serde(rename = "vpcSet", default)]
    pub vpcs: Items<Vpc>,
}

/// `CreateVpc` response.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateVpcResponse {
    /// Created VPC.
    pub vpc: Vpc,
}

/// VPC information.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vpc {
    /// VPC ID.
    pub vpc_id: String,
    /// CIDR block.
    #[serde(default)]
    pub cidr_block: Option<String>,
    /// State.
    #[serde(default)]
    pub state: Option<String>,
}

// ============================================================================
// CodeDeploy types
// ============================================================================

/// `CreateDeployment` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentInput {
    /// Application name.
    pub application_name: String,
    /// Deployment group name.
    pub deployment_group_name: String,
    /// Revision to deploy.
    pub revision: RevisionLocation,
}

/// Revision location.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionLocation {
    /// Revision type (`GitHub`).
    pub revision_type: String,
    /// GitHub location.
    pub git_hub_location: GitHubLocation,
}

/// GitHub revision location.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitHubLocation {
    /// Repository (`owner/name`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Commit SHA.
    pub commit_id: String,
}

/// `CreateDeployment` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentOutput {
    /// Deployment ID.
    pub deployment_id: String,
}

/// `GetDeployment` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDeploymentInput {
    /// Deployment ID.
    pub deployment_id: String,
}

/// `GetDeployment` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetDeploymentOutput {
    /// Deployment details.
    pub deployment_info: DeploymentInfo,
}

/// Deployment details.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
    /// Deployment ID.
    pub deployment_id: String,
    /// Status string.
    pub status: String,
}

/// `ListApplications` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ListApplicationsOutput {
    /// Application names.
    #[serde(default)]
    pub applications: Vec<String>,
}

/// `ListDeploymentGroups` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDeploymentGroupsInput {
    /// Application name.
    pub application_name: String,
}

/// `ListDeploymentGroups` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDeploymentGroupsOutput {
    /// Application name.
    pub application_name: String,
    /// Deployment group names.
    #[serde(default)]
    pub deployment_groups: Vec<String>,
}

/// `ListDeploymentConfigs` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDeploymentConfigsOutput {
    /// Deployment configuration names.
    #[serde(default)]
    pub deployment_configs_list: Vec<String>,
}

/// `ListDeployments` response.
#[derive(Debug, Clone, Deserialize)]
pub struct ListDeploymentsOutput {
    /// Deployment IDs.
    #[serde(default)]
    pub deployments: Vec<String>,
}
