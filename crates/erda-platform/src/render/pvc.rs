//! PersistentVolumeClaims for storage volumes that name a storage class.

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use erda_common::crd::{Component, Volume};
use erda_common::labels::component_labels;

use super::volume::pvc_name;

/// Render the PVC for the volume at `index`; `None` when the volume has no
/// storage class (host-path volumes claim nothing)
pub fn compose_pvc(
    component: &Component,
    index: usize,
    volume: &Volume,
    owner: &OwnerReference,
) -> Option<PersistentVolumeClaim> {
    let storage_class = volume.storage_class.as_deref().filter(|sc| !sc.is_empty())?;
    let size = Quantity(volume.size.clone().unwrap_or_default());

    Some(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(pvc_name(&component.name, index)),
            namespace: Some(component.namespace().to_string()),
            labels: Some(component_labels(&component.name, &component.labels)),
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: Some(storage_class.to_string()),
            resources: Some(VolumeResourceRequirements {
                requests: Some([("storage".to_string(), size.clone())].into()),
                limits: Some([("storage".to_string(), size)].into()),
            }),
            ..Default::default()
        }),
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "erda.terminus.io/v1beta1".into(),
            kind: "Platform".into(),
            name: "erda".into(),
            uid: "uid-1".into(),
            controller: Some(true),
            ..Default::default()
        }
    }

    fn component() -> Component {
        Component {
            name: "registry".into(),
            namespace: Some("erda-system".into()),
            ..Default::default()
        }
    }

    /// Story: only class-backed volumes claim storage, named 1-based
    #[test]
    fn story_pvc_emitted_iff_storage_class() {
        let class_backed = Volume {
            size: Some("20Gi".into()),
            storage_class: Some("local-ssd".into()),
            target_path: "/data".into(),
            ..Default::default()
        };
        let pvc = compose_pvc(&component(), 1, &class_backed, &owner()).unwrap();
        assert_eq!(pvc.metadata.name.as_deref(), Some("pvc-registry-2"));
        let spec = pvc.spec.unwrap();
        assert_eq!(spec.storage_class_name.as_deref(), Some("local-ssd"));
        let resources = spec.resources.unwrap();
        assert_eq!(
            resources.requests.as_ref().unwrap().get("storage"),
            Some(&Quantity("20Gi".into()))
        );
        assert_eq!(
            resources.limits.as_ref().unwrap().get("storage"),
            Some(&Quantity("20Gi".into()))
        );

        let host_backed = Volume {
            source_path: Some("/var/data".into()),
            target_path: "/data".into(),
            ..Default::default()
        };
        assert!(compose_pvc(&component(), 0, &host_backed, &owner()).is_none());
    }
}
