//! AWS provider: EC2 for plain instances, Auto Scaling for groups.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_autoscaling::Client as AsgClient;
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::Filter;
use aws_sdk_ec2::Client as Ec2Client;
use tracing::{debug, info};

use super::{CloudProvider, PROVIDER_AWS};
use crate::error::{Error, Result};
use crate::models::{RawInstance, RawScalingGroup};

/// Clients for one region.
struct RegionClients {
    ec2: Ec2Client,
    asg: AsgClient,
}

/// AWS provider with one EC2 and one Auto Scaling client per configured region.
pub struct AwsProvider {
    clients: HashMap<String, RegionClients>,
}

impl AwsProvider {
    /// Build clients for every region using the default credential chain.
    pub async fn new(regions: &[String]) -> Self {
        let mut clients = HashMap::new();
        for region in regions {
            let config = aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(region.clone()))
                .load()
                .await;
            clients.insert(
                region.clone(),
                RegionClients {
                    ec2: Ec2Client::new(&config),
                    asg: AsgClient::new(&config),
                },
            );
        }
        info!(regions = ?regions, "AWS clients initialised");
        Self { clients }
    }

    fn region(&self, region: &str) -> Result<&RegionClients> {
        self.clients
            .get(region)
            .ok_or_else(|| Error::adapter(region, "no client configured for region"))
    }
}

#[async_trait]
impl CloudProvider for AwsProvider {
    fn name(&self) -> &str {
        PROVIDER_AWS
    }

    async fn list_instances(
        &self,
        region: &str,
        tag_key: &str,
        tag_value: &str,
    ) -> Result<Vec<RawInstance>> {
        let ec2 = &self.region(region)?.ec2;
        let started = Instant::now();
        let filter = Filter::builder()
            .name(format!("tag:{}", tag_key))
            .values(tag_value)
            .build();

        let mut instances = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = ec2
                .describe_instances()
                .filters(filter.clone())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| Error::adapter(region, DisplayErrorContext(e)))?;

            for reservation in output.reservations() {
                for instance in reservation.instances() {
                    let Some(instance_id) = instance.instance_id() else {
                        continue;
                    };
                    let tags = instance
                        .tags()
                        .iter()
                        .filter_map(|t| Some((t.key()?.to_string(), t.value()?.to_string())))
                        .collect();
                    instances.push(RawInstance {
                        instance_id: instance_id.to_string(),
                        instance_type: instance
                            .instance_type()
                            .map(|t| t.as_str().to_string())
                            .unwrap_or_default(),
                        state: instance
                            .state()
                            .and_then(|s| s.name())
                            .map(|n| n.as_str().to_string())
                            .unwrap_or_default(),
                        region: region.to_string(),
                        tags,
                    });
                }
            }

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(
            region,
            count = instances.len(),
            elapsed = ?started.elapsed(),
            "polled EC2 instances"
        );
        Ok(instances)
    }

    async fn list_scaling_groups(&self, region: &str) -> Result<Vec<RawScalingGroup>> {
        let asg = &self.region(region)?.asg;
        let started = Instant::now();

        let mut groups = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = asg
                .describe_auto_scaling_groups()
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| Error::adapter(region, DisplayErrorContext(e)))?;

            for group in output.auto_scaling_groups() {
                let Some(name) = group.auto_scaling_group_name() else {
                    continue;
                };
                groups.push(RawScalingGroup {
                    name: name.to_string(),
                    region: region.to_string(),
                    min_size: group.min_size().unwrap_or_default(),
                    max_size: group.max_size().unwrap_or_default(),
                    desired_capacity: group.desired_capacity().unwrap_or_default(),
                    member_types: group
                        .instances()
                        .iter()
                        .map(|i| i.instance_type().unwrap_or_default().to_string())
                        .collect(),
                    tags: group
                        .tags()
                        .iter()
                        .filter_map(|t| Some((t.key()?.to_string(), t.value()?.to_string())))
                        .collect(),
                });
            }

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        debug!(
            region,
            count = groups.len(),
            elapsed = ?started.elapsed(),
            "polled auto scaling groups"
        );
        Ok(groups)
    }

    async fn start_instances(&self, region: &str, instance_ids: &[String]) -> Result<()> {
        self.region(region)?
            .ec2
            .start_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(|e| Error::adapter(region, DisplayErrorContext(e)))?;
        Ok(())
    }

    async fn stop_instances(&self, region: &str, instance_ids: &[String]) -> Result<()> {
        self.region(region)?
            .ec2
            .stop_instances()
            .set_instance_ids(Some(instance_ids.to_vec()))
            .send()
            .await
            .map_err(|e| Error::adapter(region, DisplayErrorContext(e)))?;
        Ok(())
    }

    async fn resize_scaling_group(
        &self,
        region: &str,
        group_name: &str,
        min_size: i32,
        desired_capacity: i32,
    ) -> Result<()> {
        // desired capacity must stay >= min size, so both are set together
        self.region(region)?
            .asg
            .update_auto_scaling_group()
            .auto_scaling_group_name(group_name)
            .min_size(min_size)
            .desired_capacity(desired_capacity)
            .send()
            .await
            .map_err(|e| Error::adapter(region, DisplayErrorContext(e)))?;
        Ok(())
    }

    async fn ping(&self, region: &str) -> Result<bool> {
        let output = self
            .region(region)?
            .ec2
            .describe_availability_zones()
            .send()
            .await
            .map_err(|e| Error::adapter(region, DisplayErrorContext(e)))?;
        Ok(!output.availability_zones().is_empty())
    }
}
