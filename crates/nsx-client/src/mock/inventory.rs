//! Container inventory operations for MockNsxClient

use super::MockNsxClient;
use crate::error::NsxError;
use crate::models::*;

pub async fn get_container_cluster(client: &MockNsxClient, cluster_id: &str) -> Result<ContainerCluster, NsxError> {
    client.enter("get_container_cluster", Some(cluster_id))?;
    client.container_clusters
        .lock()
        .unwrap()
        .get(cluster_id)
        .cloned()
        .ok_or_else(|| NsxError::NotFound(format!("Container cluster {} not found", cluster_id)))
}

pub async fn create_container_cluster(client: &MockNsxClient, cluster: &ContainerCluster) -> Result<ContainerCluster, NsxError> {
    client.enter("create_container_cluster", Some(&cluster.external_id))?;
    client.container_clusters
        .lock()
        .unwrap()
        .insert(cluster.external_id.clone(), cluster.clone());
    Ok(cluster.clone())
}

pub async fn list_container_projects(client: &MockNsxClient, cluster_id: &str) -> Result<Vec<ContainerProject>, NsxError> {
    client.enter("list_container_projects", Some(cluster_id))?;
    Ok(client.container_projects
        .lock()
        .unwrap()
        .values()
        .filter(|p| p.container_cluster_id == cluster_id)
        .cloned()
        .collect())
}

pub async fn list_container_application_instances(client: &MockNsxClient, cluster_id: &str) -> Result<Vec<ContainerApplicationInstance>, NsxError> {
    client.enter("list_container_application_instances", Some(cluster_id))?;
    Ok(client.container_app_instances
        .lock()
        .unwrap()
        .values()
        .filter(|a| a.container_cluster_id == cluster_id)
        .cloned()
        .collect())
}

/// Records the batch and applies it to the stored projects/application instances
pub async fn send_inventory_updates(client: &MockNsxClient, cluster_id: &str, data: &ContainerInventoryData) -> Result<(), NsxError> {
    client.enter("send_inventory_updates", Some(cluster_id))?;
    client.inventory_batches.lock().unwrap().push(data.clone());

    for obj in &data.container_inventory_objects {
        let external_id = obj.container_object["external_id"].as_str().unwrap_or_default().to_string();
        let resource_type = obj.container_object["resource_type"].as_str().unwrap_or_default();
        let delete = obj.object_update_type == "DELETE";
        match resource_type {
            "ContainerProject" => {
                let mut projects = client.container_projects.lock().unwrap();
                if delete {
                    projects.remove(&external_id);
                } else if let Ok(project) = serde_json::from_value::<ContainerProject>(obj.container_object.clone()) {
                    projects.insert(external_id, project);
                }
            }
            "ContainerApplicationInstance" => {
                let mut instances = client.container_app_instances.lock().unwrap();
                if delete {
                    instances.remove(&external_id);
                } else if let Ok(instance) = serde_json::from_value::<ContainerApplicationInstance>(obj.container_object.clone()) {
                    instances.insert(external_id, instance);
                }
            }
            _ => {}
        }
    }
    Ok(())
}
