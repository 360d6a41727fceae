use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::{Finding, Resource, ResourceFindings};

mod checks;
pub mod props;

pub use checks::RuleResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RuleGroup {
    #[serde(rename = "IAM")]
    Iam,
    S3,
    Lambda,
    #[serde(rename = "RDS")]
    Rds,
    #[serde(rename = "EC2")]
    Ec2,
    #[serde(rename = "NATGateway")]
    NatGateway,
    #[serde(rename = "DynamoDB")]
    DynamoDb,
    #[serde(rename = "SQS")]
    Sqs,
    #[serde(rename = "SNS")]
    Sns,
    #[serde(rename = "KMS")]
    Kms,
    Logs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Family {
    Storage,
    Network,
    Compute,
    Policy,
    Messaging,
    Observability,
}

impl RuleGroup {
    pub const ALL: [RuleGroup; 11] = [
        RuleGroup::Iam,
        RuleGroup::S3,
        RuleGroup::Lambda,
        RuleGroup::Rds,
        RuleGroup::Ec2,
        RuleGroup::NatGateway,
        RuleGroup::DynamoDb,
        RuleGroup::Sqs,
        RuleGroup::Sns,
        RuleGroup::Kms,
        RuleGroup::Logs,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            RuleGroup::Iam => "IAM",
            RuleGroup::S3 => "S3",
            RuleGroup::Lambda => "Lambda",
            RuleGroup::Rds => "RDS",
            RuleGroup::Ec2 => "EC2",
            RuleGroup::NatGateway => "NATGateway",
            RuleGroup::DynamoDb => "DynamoDB",
            RuleGroup::Sqs => "SQS",
            RuleGroup::Sns => "SNS",
            RuleGroup::Kms => "KMS",
            RuleGroup::Logs => "Logs",
        }
    }

    pub const fn family(self) -> Family {
        match self {
            RuleGroup::S3 | RuleGroup::Rds | RuleGroup::DynamoDb => Family::Storage,
            RuleGroup::Ec2 | RuleGroup::NatGateway => Family::Network,
            RuleGroup::Lambda => Family::Compute,
            RuleGroup::Iam | RuleGroup::Kms => Family::Policy,
            RuleGroup::Sqs | RuleGroup::Sns => Family::Messaging,
            RuleGroup::Logs => Family::Observability,
        }
    }
}

impl fmt::Display for RuleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        RuleGroup::ALL
            .into_iter()
            .find(|g| g.as_str().to_ascii_lowercase() == normalized)
            .ok_or_else(|| {
                let names: Vec<&str> = RuleGroup::ALL.iter().map(|g| g.as_str()).collect();
                format!(
                    "unknown rule group: {} (expected one of {})",
                    s.trim(),
                    names.join("|")
                )
            })
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Family::Storage => "storage",
            Family::Network => "network",
            Family::Compute => "compute",
            Family::Policy => "policy",
            Family::Messaging => "messaging",
            Family::Observability => "observability",
        };
        f.write_str(s)
    }
}

pub struct Rule {
    pub id: &'static str,
    pub group: RuleGroup,
    pub resource_types: &'static [&'static str],
    pub check: fn(&Resource) -> RuleResult,
}

impl Rule {
    pub fn applies_to(&self, resource: &Resource) -> bool {
        resource.is_type(self.resource_types)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("resource_types", &self.resource_types)
            .finish()
    }
}

const S3_BUCKET: &[&str] = &["AWS::S3::Bucket"];
const LAMBDA_FUNCTION: &[&str] = &["AWS::Lambda::Function"];
const IAM_POLICIES: &[&str] = &[
    "AWS::IAM::Policy",
    "AWS::IAM::ManagedPolicy",
    "AWS::IAM::Role",
    "AWS::IAM::User",
    "AWS::IAM::Group",
];
const IAM_PRINCIPALS: &[&str] = &["AWS::IAM::Role", "AWS::IAM::User", "AWS::IAM::Group"];
const RDS_DATABASES: &[&str] = &["AWS::RDS::DBInstance", "AWS::RDS::DBCluster"];
const RDS_INSTANCE: &[&str] = &["AWS::RDS::DBInstance"];
const EC2_INGRESS: &[&str] = &["AWS::EC2::SecurityGroup", "AWS::EC2::SecurityGroupIngress"];
const EC2_VOLUME: &[&str] = &["AWS::EC2::Volume"];
const EC2_INSTANCE: &[&str] = &["AWS::EC2::Instance"];
const NAT_GATEWAY: &[&str] = &["AWS::EC2::NatGateway"];
const DYNAMODB_TABLE: &[&str] = &["AWS::DynamoDB::Table"];
const SQS_QUEUE: &[&str] = &["AWS::SQS::Queue"];
const SNS_TOPIC: &[&str] = &["AWS::SNS::Topic"];
const KMS_KEY: &[&str] = &["AWS::KMS::Key"];
const LOG_GROUP: &[&str] = &["AWS::Logs::LogGroup"];

macro_rules! rule {
    ($id:literal, $group:ident, $types:ident, $check:path) => {
        Rule {
            id: $id,
            group: RuleGroup::$group,
            resource_types: $types,
            check: $check,
        }
    };
}

/// Every rule, in evaluation order. Output order within a resource follows this list.
pub static CATALOG: &[Rule] = &[
    rule!("s3-versioning", S3, S3_BUCKET, checks::s3_versioning),
    rule!("s3-encryption", S3, S3_BUCKET, checks::s3_encryption),
    rule!("s3-public-access-block", S3, S3_BUCKET, checks::s3_public_access_block),
    rule!("s3-access-logging", S3, S3_BUCKET, checks::s3_access_logging),
    rule!("s3-lifecycle", S3, S3_BUCKET, checks::s3_lifecycle),
    rule!("lambda-memory", Lambda, LAMBDA_FUNCTION, checks::lambda_memory),
    rule!("lambda-timeout", Lambda, LAMBDA_FUNCTION, checks::lambda_timeout),
    rule!("lambda-runtime", Lambda, LAMBDA_FUNCTION, checks::lambda_runtime),
    rule!("lambda-tracing", Lambda, LAMBDA_FUNCTION, checks::lambda_tracing),
    rule!("iam-wildcard-action", Iam, IAM_POLICIES, checks::iam_wildcard_action),
    rule!("iam-wildcard-resource", Iam, IAM_POLICIES, checks::iam_wildcard_resource),
    rule!("iam-admin-access", Iam, IAM_PRINCIPALS, checks::iam_admin_access),
    rule!("rds-encryption", Rds, RDS_DATABASES, checks::rds_encryption),
    rule!("rds-public", Rds, RDS_INSTANCE, checks::rds_public),
    rule!("rds-multi-az", Rds, RDS_INSTANCE, checks::rds_multi_az),
    rule!("rds-backup-retention", Rds, RDS_DATABASES, checks::rds_backup_retention),
    rule!("ec2-open-ingress", Ec2, EC2_INGRESS, checks::ec2_open_ingress),
    rule!("ec2-volume-encryption", Ec2, EC2_VOLUME, checks::ec2_volume_encryption),
    rule!("ec2-detailed-monitoring", Ec2, EC2_INSTANCE, checks::ec2_detailed_monitoring),
    rule!("nat-gateway-cost", NatGateway, NAT_GATEWAY, checks::nat_gateway_cost),
    rule!("dynamodb-pitr", DynamoDb, DYNAMODB_TABLE, checks::dynamodb_pitr),
    rule!("dynamodb-billing", DynamoDb, DYNAMODB_TABLE, checks::dynamodb_billing),
    rule!("sqs-encryption", Sqs, SQS_QUEUE, checks::sqs_encryption),
    rule!("sns-encryption", Sns, SNS_TOPIC, checks::sns_encryption),
    rule!("kms-rotation", Kms, KMS_KEY, checks::kms_rotation),
    rule!("logs-retention", Logs, LOG_GROUP, checks::logs_retention),
];

#[derive(Debug, Clone)]
pub struct RuleEvaluator {
    rules: Vec<&'static Rule>,
}

impl RuleEvaluator {
    pub fn new(groups: &[RuleGroup]) -> Self {
        let rules = CATALOG
            .iter()
            .filter(|rule| groups.is_empty() || groups.contains(&rule.group))
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[&'static Rule] {
        &self.rules
    }

    pub fn evaluate_resource(&self, resource: &Resource) -> Vec<Finding> {
        let mut out = Vec::new();
        for rule in self.rules.iter().filter(|r| r.applies_to(resource)) {
            match (rule.check)(resource) {
                Ok(findings) => {
                    if !findings.is_empty() {
                        debug!(rule = rule.id, resource = %resource.id, count = findings.len(), "rule matched");
                    }
                    out.extend(findings);
                }
                Err(err) => {
                    warn!(rule = rule.id, resource = %resource.id, error = %err, "skipping rule");
                }
            }
        }
        out
    }

    pub fn evaluate<'a>(
        &self,
        resources: impl IntoIterator<Item = &'a Resource>,
    ) -> Vec<ResourceFindings> {
        resources
            .into_iter()
            .filter_map(|resource| {
                let findings = self.evaluate_resource(resource);
                if findings.is_empty() {
                    return None;
                }
                Some(ResourceFindings {
                    resource: resource.id.clone(),
                    resource_type: resource.resource_type.clone(),
                    findings,
                })
            })
            .collect()
    }
}

impl Default for RuleEvaluator {
    fn default() -> Self {
        Self::new(&[])
    }
}
