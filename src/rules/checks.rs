use serde_json::Value;

use super::props::{self, Prop};
use crate::core::{Category, Finding, Resource, Severity};
use crate::error::RuleError;

pub type RuleResult = Result<Vec<Finding>, RuleError>;

fn none() -> RuleResult {
    Ok(Vec::new())
}

fn hit(
    r: &Resource,
    severity: Severity,
    category: Category,
    issue: impl Into<String>,
    recommendation: impl Into<String>,
) -> RuleResult {
    Ok(vec![Finding::rule(
        &r.id,
        issue,
        recommendation,
        severity,
        category,
    )])
}

// --- S3 ---

pub fn s3_versioning(r: &Resource) -> RuleResult {
    match props::string(r, &["VersioningConfiguration", "Status"])? {
        Prop::Present("Enabled") | Prop::Unresolved => none(),
        _ => hit(
            r,
            Severity::Medium,
            Category::Security,
            "S3 bucket does not have versioning enabled",
            "Set VersioningConfiguration.Status to Enabled so overwritten or deleted objects can be recovered",
        ),
    }
}

pub fn s3_encryption(r: &Resource) -> RuleResult {
    let rules = props::array(
        r,
        &["BucketEncryption", "ServerSideEncryptionConfiguration"],
    )?;
    match rules {
        Prop::Present(items) if !items.is_empty() => none(),
        Prop::Unresolved => none(),
        _ => hit(
            r,
            Severity::High,
            Category::Security,
            "S3 bucket has no server-side encryption configured",
            "Add BucketEncryption with an SSE-KMS (aws:kms) or SSE-S3 (AES256) default encryption rule",
        ),
    }
}

pub fn s3_public_access_block(r: &Resource) -> RuleResult {
    const FLAGS: [&str; 4] = [
        "BlockPublicAcls",
        "BlockPublicPolicy",
        "IgnorePublicAcls",
        "RestrictPublicBuckets",
    ];

    match props::value(r, &["PublicAccessBlockConfiguration"])? {
        Prop::Unresolved => return none(),
        Prop::Missing => {
            return hit(
                r,
                Severity::High,
                Category::Security,
                "S3 bucket has no public access block configuration",
                "Add PublicAccessBlockConfiguration with all four block/ignore/restrict flags set to true",
            );
        }
        Prop::Present(_) => {}
    }

    let mut open = Vec::new();
    for flag in FLAGS {
        match props::boolean(r, &["PublicAccessBlockConfiguration", flag])? {
            Prop::Present(true) | Prop::Unresolved => {}
            _ => open.push(flag),
        }
    }
    if open.is_empty() {
        return none();
    }
    hit(
        r,
        Severity::High,
        Category::Security,
        format!(
            "S3 bucket public access block is incomplete ({} not enabled)",
            open.join(", ")
        ),
        "Set every PublicAccessBlockConfiguration flag to true unless the bucket must be public",
    )
}

pub fn s3_access_logging(r: &Resource) -> RuleResult {
    if !props::value(r, &["LoggingConfiguration"])?.is_missing() {
        return none();
    }
    hit(
        r,
        Severity::Low,
        Category::Compliance,
        "S3 bucket server access logging is not configured",
        "Configure LoggingConfiguration to deliver access logs to a dedicated log bucket",
    )
}

pub fn s3_lifecycle(r: &Resource) -> RuleResult {
    match props::array(r, &["LifecycleConfiguration", "Rules"])? {
        Prop::Present(rules) if !rules.is_empty() => none(),
        Prop::Unresolved => none(),
        _ => hit(
            r,
            Severity::Low,
            Category::CostOptimization,
            "S3 bucket has no lifecycle rules",
            "Add lifecycle rules to transition infrequently accessed objects to cheaper storage classes and expire stale data",
        ),
    }
}

// --- Lambda ---

const LAMBDA_MEMORY_THRESHOLD_MB: f64 = 1024.0;
const LAMBDA_TIMEOUT_THRESHOLD_SECS: f64 = 300.0;

const DEPRECATED_RUNTIMES: &[&str] = &[
    "nodejs",
    "nodejs4.3",
    "nodejs4.3-edge",
    "nodejs6.10",
    "nodejs8.10",
    "nodejs10.x",
    "nodejs12.x",
    "nodejs14.x",
    "nodejs16.x",
    "python2.7",
    "python3.6",
    "python3.7",
    "python3.8",
    "ruby2.5",
    "ruby2.7",
    "java8",
    "dotnetcore1.0",
    "dotnetcore2.0",
    "dotnetcore2.1",
    "dotnetcore3.1",
    "dotnet5.0",
    "dotnet6",
    "go1.x",
];

pub fn lambda_memory(r: &Resource) -> RuleResult {
    let Some(memory) = props::number(r, &["MemorySize"])?.present() else {
        return none();
    };
    if memory <= LAMBDA_MEMORY_THRESHOLD_MB {
        return none();
    }
    hit(
        r,
        Severity::Medium,
        Category::CostOptimization,
        format!("Lambda function is configured with {memory} MB of memory"),
        "Profile the function (e.g. with Lambda Power Tuning) and lower MemorySize to the smallest value that meets latency targets",
    )
}

pub fn lambda_timeout(r: &Resource) -> RuleResult {
    let Some(timeout) = props::number(r, &["Timeout"])?.present() else {
        return none();
    };
    if timeout <= LAMBDA_TIMEOUT_THRESHOLD_SECS {
        return none();
    }
    hit(
        r,
        Severity::Low,
        Category::CostOptimization,
        format!("Lambda function timeout is {timeout} seconds"),
        "Lower the timeout so hung invocations fail fast instead of being billed for the full duration",
    )
}

pub fn lambda_runtime(r: &Resource) -> RuleResult {
    let Some(runtime) = props::string(r, &["Runtime"])?.present() else {
        return none();
    };
    if !DEPRECATED_RUNTIMES.contains(&runtime) {
        return none();
    }
    hit(
        r,
        Severity::High,
        Category::Security,
        format!("Lambda function uses deprecated runtime {runtime}"),
        "Upgrade to a supported runtime version; deprecated runtimes no longer receive security patches",
    )
}

pub fn lambda_tracing(r: &Resource) -> RuleResult {
    match props::string(r, &["TracingConfig", "Mode"])? {
        Prop::Present("Active") | Prop::Unresolved => none(),
        _ => hit(
            r,
            Severity::Low,
            Category::OperationalExcellence,
            "Lambda function does not have active X-Ray tracing",
            "Set TracingConfig.Mode to Active to trace requests across services",
        ),
    }
}

// --- IAM ---

const ADMIN_POLICY_SUFFIX: &str = ":policy/AdministratorAccess";

fn policy_documents(r: &Resource) -> Result<Vec<&Value>, RuleError> {
    let mut docs = Vec::new();
    if let Prop::Present(doc) = props::value(r, &["PolicyDocument"])? {
        docs.push(doc);
    }
    if let Prop::Present(policies) = props::array(r, &["Policies"])? {
        for (i, policy) in policies.iter().enumerate() {
            let Some(policy) = policy.as_object() else {
                if props::is_intrinsic(policy) {
                    continue;
                }
                return Err(RuleError::shape(format!("Policies[{i}]"), "object"));
            };
            if let Prop::Present(doc) = props::value_in(policy, &["PolicyDocument"])? {
                docs.push(doc);
            }
        }
    }
    Ok(docs)
}

struct Statement<'a> {
    actions: Vec<&'a str>,
    resources: Vec<&'a str>,
}

fn allow_statements(r: &Resource) -> Result<Vec<Statement<'_>>, RuleError> {
    let mut out = Vec::new();
    for doc in policy_documents(r)? {
        let Some(doc) = doc.as_object() else {
            return Err(RuleError::shape("PolicyDocument", "object"));
        };
        let Prop::Present(statements) = props::value_in(doc, &["Statement"])? else {
            continue;
        };
        for statement in props::one_or_many(statements) {
            let Some(statement) = statement.as_object() else {
                return Err(RuleError::shape("PolicyDocument.Statement", "object"));
            };
            if props::string_in(statement, &["Effect"])? != Prop::Present("Allow") {
                continue;
            }
            out.push(Statement {
                actions: literal_strings(statement.get("Action")),
                resources: literal_strings(statement.get("Resource")),
            });
        }
    }
    Ok(out)
}

fn literal_strings(value: Option<&Value>) -> Vec<&str> {
    value
        .map(props::one_or_many)
        .unwrap_or_default()
        .into_iter()
        .filter_map(Value::as_str)
        .collect()
}

pub fn iam_wildcard_action(r: &Resource) -> RuleResult {
    let statements = allow_statements(r)?;

    if statements.iter().any(|s| s.actions.contains(&"*")) {
        return hit(
            r,
            Severity::Critical,
            Category::Security,
            "IAM policy allows all actions (\"Action\": \"*\")",
            "Replace the wildcard with the specific actions the principal needs (least privilege)",
        );
    }

    let mut services: Vec<&str> = statements
        .iter()
        .flat_map(|s| s.actions.iter())
        .filter_map(|a| a.strip_suffix(":*"))
        .collect();
    services.sort();
    services.dedup();
    if services.is_empty() {
        return none();
    }
    hit(
        r,
        Severity::High,
        Category::Security,
        format!(
            "IAM policy allows every action of service(s): {}",
            services.join(", ")
        ),
        "Enumerate the required actions instead of granting service-wide wildcards",
    )
}

pub fn iam_wildcard_resource(r: &Resource) -> RuleResult {
    let count = allow_statements(r)?
        .iter()
        .filter(|s| !s.actions.contains(&"*") && s.resources.contains(&"*"))
        .count();
    if count == 0 {
        return none();
    }
    hit(
        r,
        Severity::Medium,
        Category::Security,
        format!("IAM policy has {count} statement(s) that apply to all resources (\"Resource\": \"*\")"),
        "Scope Resource to the specific ARNs the actions must reach",
    )
}

pub fn iam_admin_access(r: &Resource) -> RuleResult {
    let Prop::Present(arns) = props::array(r, &["ManagedPolicyArns"])? else {
        return none();
    };
    let attached = arns
        .iter()
        .filter_map(props::flatten_literal)
        .any(|arn| arn.ends_with(ADMIN_POLICY_SUFFIX));
    if !attached {
        return none();
    }
    hit(
        r,
        Severity::High,
        Category::Security,
        "AdministratorAccess managed policy is attached",
        "Attach a narrowly scoped policy instead of AdministratorAccess",
    )
}

// --- RDS ---

fn is_cluster_member(r: &Resource) -> Result<bool, RuleError> {
    Ok(r.resource_type == "AWS::RDS::DBInstance"
        && !props::value(r, &["DBClusterIdentifier"])?.is_missing())
}

pub fn rds_encryption(r: &Resource) -> RuleResult {
    if is_cluster_member(r)? {
        return none();
    }
    match props::boolean(r, &["StorageEncrypted"])? {
        Prop::Present(true) | Prop::Unresolved => none(),
        _ => hit(
            r,
            Severity::High,
            Category::Security,
            "Database storage is not encrypted",
            "Set StorageEncrypted to true (optionally with a customer managed KmsKeyId)",
        ),
    }
}

pub fn rds_public(r: &Resource) -> RuleResult {
    if props::boolean(r, &["PubliclyAccessible"])? != Prop::Present(true) {
        return none();
    }
    hit(
        r,
        Severity::Critical,
        Category::Security,
        "Database instance is publicly accessible",
        "Set PubliclyAccessible to false and reach the database through private subnets",
    )
}

pub fn rds_multi_az(r: &Resource) -> RuleResult {
    if is_cluster_member(r)? {
        return none();
    }
    match props::boolean(r, &["MultiAZ"])? {
        Prop::Present(true) | Prop::Unresolved => none(),
        _ => hit(
            r,
            Severity::Medium,
            Category::OperationalExcellence,
            "Database instance is not deployed across multiple availability zones",
            "Enable MultiAZ for production databases to survive an availability zone outage",
        ),
    }
}

pub fn rds_backup_retention(r: &Resource) -> RuleResult {
    const MIN_DAYS: f64 = 7.0;

    if is_cluster_member(r)? {
        return none();
    }
    let days = match props::number(r, &["BackupRetentionPeriod"])? {
        Prop::Unresolved => return none(),
        Prop::Missing => 1.0,
        Prop::Present(days) => days,
    };
    if days >= MIN_DAYS {
        return none();
    }
    hit(
        r,
        Severity::Medium,
        Category::Compliance,
        format!("Database backup retention is {days} day(s)"),
        "Set BackupRetentionPeriod to at least 7 days to meet common retention requirements",
    )
}

// --- EC2 ---

const WORLD_V4: &str = "0.0.0.0/0";
const WORLD_V6: &str = "::/0";
const ADMIN_PORTS: [f64; 2] = [22.0, 3389.0];
const WEB_PORTS: [f64; 2] = [80.0, 443.0];

pub fn ec2_open_ingress(r: &Resource) -> RuleResult {
    let entries: Vec<&serde_json::Map<String, Value>> =
        if r.resource_type == "AWS::EC2::SecurityGroupIngress" {
            vec![&r.properties]
        } else {
            let Prop::Present(items) = props::array(r, &["SecurityGroupIngress"])? else {
                return none();
            };
            let mut entries = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Object(map) if !props::is_intrinsic(item) => entries.push(map),
                    _ if props::is_intrinsic(item) => {}
                    _ => {
                        return Err(RuleError::shape(
                            format!("SecurityGroupIngress[{i}]"),
                            "object",
                        ));
                    }
                }
            }
            entries
        };

    let mut out = Vec::new();
    for entry in entries {
        let v4 = props::string_in(entry, &["CidrIp"])? == Prop::Present(WORLD_V4);
        let v6 = props::string_in(entry, &["CidrIpv6"])? == Prop::Present(WORLD_V6);
        if !v4 && !v6 {
            continue;
        }
        let source = if v4 { WORLD_V4 } else { WORLD_V6 };

        let all_traffic = props::string_in(entry, &["IpProtocol"])? == Prop::Present("-1");
        let from = props::number_in(entry, &["FromPort"])?.present();
        let to = props::number_in(entry, &["ToPort"])?.present().or(from);

        let (severity, ports) = match (all_traffic, from, to) {
            (true, _, _) | (false, None, _) | (false, _, None) => {
                (Severity::Critical, "all ports".to_string())
            }
            (false, Some(from), Some(to)) => {
                let covers = |p: f64| from <= p && p <= to;
                if ADMIN_PORTS.iter().any(|p| covers(*p)) {
                    (Severity::Critical, port_label(from, to))
                } else if from == to && WEB_PORTS.contains(&from) {
                    continue;
                } else {
                    (Severity::High, port_label(from, to))
                }
            }
        };

        out.push(Finding::rule(
            &r.id,
            format!("Security group allows inbound traffic from {source} on {ports}"),
            "Restrict the ingress CIDR to known address ranges or front the service with a load balancer",
            severity,
            Category::Security,
        ));
    }
    Ok(out)
}

fn port_label(from: f64, to: f64) -> String {
    if from == to {
        format!("port {from}")
    } else {
        format!("ports {from}-{to}")
    }
}

pub fn ec2_volume_encryption(r: &Resource) -> RuleResult {
    match props::boolean(r, &["Encrypted"])? {
        Prop::Present(true) | Prop::Unresolved => none(),
        _ => hit(
            r,
            Severity::High,
            Category::Security,
            "EBS volume is not encrypted",
            "Set Encrypted to true or enable EBS encryption by default for the account",
        ),
    }
}

pub fn ec2_detailed_monitoring(r: &Resource) -> RuleResult {
    match props::boolean(r, &["Monitoring"])? {
        Prop::Present(true) | Prop::Unresolved => none(),
        _ => hit(
            r,
            Severity::Low,
            Category::OperationalExcellence,
            "EC2 instance does not have detailed monitoring enabled",
            "Set Monitoring to true for one-minute CloudWatch metrics",
        ),
    }
}

// --- NAT gateway ---

pub fn nat_gateway_cost(r: &Resource) -> RuleResult {
    hit(
        r,
        Severity::Medium,
        Category::CostOptimization,
        "NAT gateway incurs hourly and per-GB data processing charges",
        "Use VPC gateway endpoints for S3/DynamoDB traffic and share NAT gateways in non-production environments",
    )
}

// --- DynamoDB ---

pub fn dynamodb_pitr(r: &Resource) -> RuleResult {
    let path = [
        "PointInTimeRecoverySpecification",
        "PointInTimeRecoveryEnabled",
    ];
    match props::boolean(r, &path)? {
        Prop::Present(true) | Prop::Unresolved => none(),
        _ => hit(
            r,
            Severity::Medium,
            Category::Compliance,
            "DynamoDB table does not have point-in-time recovery enabled",
            "Enable PointInTimeRecoverySpecification.PointInTimeRecoveryEnabled",
        ),
    }
}

pub fn dynamodb_billing(r: &Resource) -> RuleResult {
    match props::string(r, &["BillingMode"])? {
        Prop::Present("PAY_PER_REQUEST") | Prop::Unresolved => none(),
        _ => hit(
            r,
            Severity::Low,
            Category::CostOptimization,
            "DynamoDB table uses provisioned capacity",
            "Consider BillingMode PAY_PER_REQUEST for spiky or low-traffic workloads, or enable auto scaling",
        ),
    }
}

// --- messaging ---

pub fn sqs_encryption(r: &Resource) -> RuleResult {
    if !props::value(r, &["KmsMasterKeyId"])?.is_missing() {
        return none();
    }
    match props::boolean(r, &["SqsManagedSseEnabled"])? {
        Prop::Present(true) | Prop::Unresolved => none(),
        _ => hit(
            r,
            Severity::Medium,
            Category::Security,
            "SQS queue does not configure encryption at rest",
            "Set KmsMasterKeyId to a KMS key or enable SqsManagedSseEnabled",
        ),
    }
}

pub fn sns_encryption(r: &Resource) -> RuleResult {
    if !props::value(r, &["KmsMasterKeyId"])?.is_missing() {
        return none();
    }
    hit(
        r,
        Severity::Medium,
        Category::Security,
        "SNS topic is not encrypted with a KMS key",
        "Set KmsMasterKeyId to a customer managed or AWS managed KMS key",
    )
}

// --- KMS ---

pub fn kms_rotation(r: &Resource) -> RuleResult {
    match props::string(r, &["KeySpec"])? {
        Prop::Missing | Prop::Present("SYMMETRIC_DEFAULT") => {}
        _ => return none(),
    }
    match props::boolean(r, &["EnableKeyRotation"])? {
        Prop::Present(true) | Prop::Unresolved => none(),
        _ => hit(
            r,
            Severity::Medium,
            Category::Compliance,
            "KMS key does not have automatic rotation enabled",
            "Set EnableKeyRotation to true",
        ),
    }
}

// --- logs ---

pub fn logs_retention(r: &Resource) -> RuleResult {
    if !props::value(r, &["RetentionInDays"])?.is_missing() {
        return none();
    }
    hit(
        r,
        Severity::Low,
        Category::CostOptimization,
        "Log group retains logs indefinitely",
        "Set RetentionInDays to the shortest period your compliance requirements allow",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn res(ty: &str, props: Value) -> Resource {
        Resource::new("R", ty).with_properties(props)
    }

    #[test]
    fn s3_versioning_triggers_on_absence_and_suspended() {
        let absent = res("AWS::S3::Bucket", json!({}));
        assert_eq!(s3_versioning(&absent).expect("eval").len(), 1);

        let suspended = res(
            "AWS::S3::Bucket",
            json!({"VersioningConfiguration": {"Status": "Suspended"}}),
        );
        assert_eq!(s3_versioning(&suspended).expect("eval").len(), 1);

        let enabled = res(
            "AWS::S3::Bucket",
            json!({"VersioningConfiguration": {"Status": "Enabled"}}),
        );
        assert!(s3_versioning(&enabled).expect("eval").is_empty());
    }

    #[test]
    fn s3_encryption_requires_a_rule() {
        let empty = res(
            "AWS::S3::Bucket",
            json!({"BucketEncryption": {"ServerSideEncryptionConfiguration": []}}),
        );
        let f = s3_encryption(&empty).expect("eval");
        assert_eq!(f[0].severity, Severity::High);

        let ok = res(
            "AWS::S3::Bucket",
            json!({"BucketEncryption": {"ServerSideEncryptionConfiguration": [
                {"ServerSideEncryptionByDefault": {"SSEAlgorithm": "aws:kms"}}
            ]}}),
        );
        assert!(s3_encryption(&ok).expect("eval").is_empty());
    }

    #[test]
    fn s3_public_access_block_lists_open_flags() {
        let partial = res(
            "AWS::S3::Bucket",
            json!({"PublicAccessBlockConfiguration": {
                "BlockPublicAcls": true, "BlockPublicPolicy": false,
                "IgnorePublicAcls": true, "RestrictPublicBuckets": true
            }}),
        );
        let f = s3_public_access_block(&partial).expect("eval");
        assert_eq!(f.len(), 1);
        assert!(f[0].issue.contains("BlockPublicPolicy"));
    }

    #[test]
    fn lambda_memory_threshold() {
        let big = res("AWS::Lambda::Function", json!({"MemorySize": 2048}));
        let f = lambda_memory(&big).expect("eval");
        assert_eq!(f[0].category, Category::CostOptimization);
        assert!(f[0].issue.contains("2048"));

        let small = res("AWS::Lambda::Function", json!({"MemorySize": 1024}));
        assert!(lambda_memory(&small).expect("eval").is_empty());

        let default = res("AWS::Lambda::Function", json!({}));
        assert!(lambda_memory(&default).expect("eval").is_empty());
    }

    #[test]
    fn lambda_memory_rejects_unexpected_shape() {
        let odd = res("AWS::Lambda::Function", json!({"MemorySize": [1, 2]}));
        assert!(lambda_memory(&odd).is_err());
    }

    #[test]
    fn lambda_runtime_flags_deprecated_versions() {
        let old = res("AWS::Lambda::Function", json!({"Runtime": "python3.7"}));
        assert_eq!(lambda_runtime(&old).expect("eval").len(), 1);
        let new = res("AWS::Lambda::Function", json!({"Runtime": "python3.12"}));
        assert!(lambda_runtime(&new).expect("eval").is_empty());
    }

    #[test]
    fn iam_full_wildcard_is_critical() {
        let role = res(
            "AWS::IAM::Role",
            json!({"Policies": [{"PolicyName": "p", "PolicyDocument": {
                "Statement": [{"Effect": "Allow", "Action": "*", "Resource": "*"}]
            }}]}),
        );
        let f = iam_wildcard_action(&role).expect("eval");
        assert_eq!(f[0].severity, Severity::Critical);
        // full wildcard statements are reported once, by the action rule
        assert!(iam_wildcard_resource(&role).expect("eval").is_empty());
    }

    #[test]
    fn iam_service_wildcards_and_resource_wildcards() {
        let policy = res(
            "AWS::IAM::Policy",
            json!({"PolicyDocument": {"Statement": [
                {"Effect": "Allow", "Action": ["s3:*", "sqs:SendMessage"], "Resource": "*"},
                {"Effect": "Deny", "Action": "ec2:*", "Resource": "*"}
            ]}}),
        );
        let f = iam_wildcard_action(&policy).expect("eval");
        assert_eq!(f[0].severity, Severity::High);
        assert!(f[0].issue.contains("s3"));
        assert!(!f[0].issue.contains("ec2"));
        assert_eq!(iam_wildcard_resource(&policy).expect("eval").len(), 1);
    }

    #[test]
    fn iam_statement_of_wrong_shape_is_an_error() {
        let policy = res(
            "AWS::IAM::Policy",
            json!({"PolicyDocument": {"Statement": ["not-an-object"]}}),
        );
        assert!(iam_wildcard_action(&policy).is_err());
    }

    #[test]
    fn iam_admin_access_through_join() {
        let role = res(
            "AWS::IAM::Role",
            json!({"ManagedPolicyArns": [{"Fn::Join": ["", [
                "arn:", {"Ref": "AWS::Partition"}, ":iam::aws:policy/AdministratorAccess"
            ]]}]}),
        );
        assert_eq!(iam_admin_access(&role).expect("eval").len(), 1);
    }

    #[test]
    fn rds_cluster_members_defer_to_cluster() {
        let member = res(
            "AWS::RDS::DBInstance",
            json!({"DBClusterIdentifier": {"Ref": "Cluster"}}),
        );
        assert!(rds_encryption(&member).expect("eval").is_empty());
        assert!(rds_backup_retention(&member).expect("eval").is_empty());

        let standalone = res("AWS::RDS::DBInstance", json!({"BackupRetentionPeriod": 3}));
        assert_eq!(rds_encryption(&standalone).expect("eval").len(), 1);
        assert_eq!(rds_backup_retention(&standalone).expect("eval").len(), 1);
    }

    #[test]
    fn open_ingress_severity_depends_on_ports() {
        let sg = res(
            "AWS::EC2::SecurityGroup",
            json!({"SecurityGroupIngress": [
                {"IpProtocol": "tcp", "FromPort": 443, "ToPort": 443, "CidrIp": "0.0.0.0/0"},
                {"IpProtocol": "tcp", "FromPort": 22, "ToPort": 22, "CidrIp": "0.0.0.0/0"},
                {"IpProtocol": "tcp", "FromPort": 8080, "ToPort": 8081, "CidrIpv6": "::/0"},
                {"IpProtocol": "tcp", "FromPort": 5432, "ToPort": 5432, "CidrIp": "10.0.0.0/8"}
            ]}),
        );
        let f = ec2_open_ingress(&sg).expect("eval");
        assert_eq!(f.len(), 2);
        assert_eq!(f[0].severity, Severity::Critical);
        assert!(f[0].issue.contains("port 22"));
        assert_eq!(f[1].severity, Severity::High);
        assert!(f[1].issue.contains("ports 8080-8081"));
    }

    #[test]
    fn standalone_ingress_resource_all_traffic() {
        let ingress = res(
            "AWS::EC2::SecurityGroupIngress",
            json!({"IpProtocol": "-1", "CidrIp": "0.0.0.0/0"}),
        );
        let f = ec2_open_ingress(&ingress).expect("eval");
        assert_eq!(f[0].severity, Severity::Critical);
        assert!(f[0].issue.contains("all ports"));
    }

    #[test]
    fn kms_rotation_skips_asymmetric_keys() {
        let asym = res("AWS::KMS::Key", json!({"KeySpec": "RSA_2048"}));
        assert!(kms_rotation(&asym).expect("eval").is_empty());
        let sym = res("AWS::KMS::Key", json!({}));
        assert_eq!(kms_rotation(&sym).expect("eval").len(), 1);
    }

    #[test]
    fn sqs_encryption_accepts_either_mechanism() {
        let keyed = res("AWS::SQS::Queue", json!({"KmsMasterKeyId": {"Ref": "Key"}}));
        assert!(sqs_encryption(&keyed).expect("eval").is_empty());
        let managed = res("AWS::SQS::Queue", json!({"SqsManagedSseEnabled": true}));
        assert!(sqs_encryption(&managed).expect("eval").is_empty());
        let plain = res("AWS::SQS::Queue", json!({}));
        assert_eq!(sqs_encryption(&plain).expect("eval").len(), 1);
    }
}
