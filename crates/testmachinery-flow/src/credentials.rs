//! Cluster credentials handed to steps.
//!
//! A Testrun names kubeconfigs (`shoot`, `seed`, `gardener`, ...). Each one
//! becomes a projected volume mounted under [`KUBECONFIG_PATH`]. The mount for
//! the system under test is the only one untrusted steps get to see.

use std::collections::BTreeMap;

use testmachinery_types::workflow::{
    ProjectedVolumeSource, SecretProjection, ServiceAccountTokenProjection, Volume,
    VolumeMount, VolumeProjection, VolumeSource,
};
use testmachinery_types::{
    KeyRef, KubeconfigSource, ProjectedToken, SYSTEM_UNDER_TEST_KUBECONFIG, Testrun,
};

use crate::error::{Error, Result};

/// Directory all kubeconfig mounts live under.
pub const KUBECONFIG_PATH: &str = "/tmp/env/kubeconfigs";

/// File name of the kubeconfig inside its mount.
const KUBECONFIG_FILE: &str = "kubeconfig";

/// File name of a projected token inside its mount.
const TOKEN_FILE: &str = "token";

/// Credentials derived from a Testrun.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Environment bindings pointing at each mounted kubeconfig.
    pub kubeconfig_env: BTreeMap<String, String>,
    /// Kubeconfigs read from a secret key, by name.
    pub secrets_to_mount: BTreeMap<String, KeyRef>,
    /// Kubeconfigs backed by a projected service-account token, by name.
    pub projected_tokens: BTreeMap<String, ProjectedToken>,
}

impl Credentials {
    pub fn is_empty(&self) -> bool {
        self.secrets_to_mount.is_empty() && self.projected_tokens.is_empty()
    }

    /// Volumes and mounts, partitioned by trust.
    pub fn mounts(&self) -> CredentialMounts {
        let mut all: Vec<CredentialMount> = Vec::new();

        for (name, key_ref) in &self.secrets_to_mount {
            all.push(CredentialMount::new(
                name,
                vec![VolumeProjection {
                    secret: Some(SecretProjection::single(key_ref, KUBECONFIG_FILE)),
                    service_account_token: None,
                }],
            ));
        }

        for (name, token) in &self.projected_tokens {
            all.push(CredentialMount::new(
                name,
                vec![
                    VolumeProjection {
                        secret: Some(SecretProjection::single(
                            &token.kubeconfig_secret,
                            KUBECONFIG_FILE,
                        )),
                        service_account_token: None,
                    },
                    VolumeProjection {
                        secret: None,
                        service_account_token: Some(ServiceAccountTokenProjection {
                            path: TOKEN_FILE.to_string(),
                            audience: token.audience.clone(),
                            expiration_seconds: token.expiration_seconds,
                        }),
                    },
                ],
            ));
        }

        all.sort_by(|a, b| a.name.cmp(&b.name));
        CredentialMounts::partition(all)
    }
}

/// One kubeconfig as a volume plus its mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialMount {
    pub name: String,
    pub volume: Volume,
    pub mount: VolumeMount,
}

impl CredentialMount {
    fn new(name: &str, sources: Vec<VolumeProjection>) -> Self {
        let volume_name = format!("kubeconfig-{}", name);
        Self {
            name: name.to_string(),
            volume: Volume {
                name: volume_name.clone(),
                source: VolumeSource::Projected(ProjectedVolumeSource { sources }),
            },
            mount: VolumeMount {
                name: volume_name,
                mount_path: format!("{}/{}", KUBECONFIG_PATH, name),
                sub_path: None,
                read_only: true,
            },
        }
    }
}

/// Credential mounts split by who may use them.
///
/// The system-under-test mount is in both lists; every other mount is
/// trusted-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialMounts {
    pub trusted: Vec<CredentialMount>,
    pub untrusted: Vec<CredentialMount>,
}

impl CredentialMounts {
    pub fn partition(mounts: Vec<CredentialMount>) -> Self {
        let untrusted = mounts
            .iter()
            .filter(|m| m.name == SYSTEM_UNDER_TEST_KUBECONFIG)
            .cloned()
            .collect();
        Self {
            trusted: mounts,
            untrusted,
        }
    }

    /// Mounts a step may use.
    pub fn for_step(&self, untrusted: bool) -> &[CredentialMount] {
        if untrusted {
            &self.untrusted
        } else {
            &self.trusted
        }
    }

    /// Every credential volume, once.
    pub fn volumes(&self) -> impl Iterator<Item = &Volume> {
        self.trusted.iter().map(|m| &m.volume)
    }
}

/// Derives [`Credentials`] for a Testrun.
pub trait CredentialProvider {
    fn parse(&self, testrun: &Testrun) -> Result<Credentials>;
}

/// Reads credentials straight from `spec.kubeconfigs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecCredentialProvider;

impl CredentialProvider for SpecCredentialProvider {
    fn parse(&self, testrun: &Testrun) -> Result<Credentials> {
        let mut credentials = Credentials::default();

        for (name, source) in &testrun.spec.kubeconfigs {
            validate_name(name)?;
            match source {
                KubeconfigSource::Secret(key_ref) => {
                    validate_key_ref(name, key_ref)?;
                    credentials
                        .secrets_to_mount
                        .insert(name.clone(), key_ref.clone());
                }
                KubeconfigSource::ServiceAccountToken(token) => {
                    validate_key_ref(name, &token.kubeconfig_secret)?;
                    credentials
                        .projected_tokens
                        .insert(name.clone(), token.clone());
                }
            }
            credentials.kubeconfig_env.insert(
                kubeconfig_env_name(name),
                format!("{}/{}/{}", KUBECONFIG_PATH, name, KUBECONFIG_FILE),
            );
        }

        Ok(credentials)
    }
}

/// `shoot` -> `TM_KUBECONFIG_SHOOT`.
pub fn kubeconfig_env_name(name: &str) -> String {
    format!("TM_KUBECONFIG_{}", name.to_ascii_uppercase().replace('-', "_"))
}

/// Kubeconfig names end up in volume names and paths.
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 52
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(Error::Credentials(format!(
            "invalid kubeconfig name '{}': must be a lowercase DNS label",
            name
        )))
    }
}

fn validate_key_ref(name: &str, key_ref: &KeyRef) -> Result<()> {
    if key_ref.name.is_empty() || key_ref.key.is_empty() {
        return Err(Error::Credentials(format!(
            "kubeconfig '{}' needs a secret name and key",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use testmachinery_types::TestrunSpec;

    fn testrun_with(kubeconfigs: Vec<(&str, KubeconfigSource)>) -> Testrun {
        let mut spec = TestrunSpec::default();
        for (name, source) in kubeconfigs {
            spec.kubeconfigs.insert(name.to_string(), source);
        }
        Testrun::new("tr", spec)
    }

    #[test]
    fn test_parse_secret_and_token() {
        let testrun = testrun_with(vec![
            (
                "shoot",
                KubeconfigSource::Secret(KeyRef::new("shoot-kc", "kubeconfig")),
            ),
            (
                "gardener",
                KubeconfigSource::ServiceAccountToken(ProjectedToken {
                    kubeconfig_secret: KeyRef::new("garden-kc", "kubeconfig"),
                    audience: Some("gardener".into()),
                    expiration_seconds: Some(3600),
                }),
            ),
        ]);

        let credentials = SpecCredentialProvider.parse(&testrun).unwrap();
        assert_eq!(credentials.secrets_to_mount.len(), 1);
        assert_eq!(credentials.projected_tokens.len(), 1);
        assert_eq!(
            credentials.kubeconfig_env["TM_KUBECONFIG_SHOOT"],
            "/tmp/env/kubeconfigs/shoot/kubeconfig"
        );
        assert!(credentials.kubeconfig_env.contains_key("TM_KUBECONFIG_GARDENER"));
    }

    #[test]
    fn test_mounts_partition_by_name() {
        let testrun = testrun_with(vec![
            ("shoot", KubeconfigSource::Secret(KeyRef::new("s", "k"))),
            ("seed", KubeconfigSource::Secret(KeyRef::new("d", "k"))),
        ]);
        let mounts = SpecCredentialProvider.parse(&testrun).unwrap().mounts();

        let trusted: Vec<&str> = mounts.trusted.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(trusted, vec!["seed", "shoot"]);
        let untrusted: Vec<&str> = mounts.untrusted.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(untrusted, vec!["shoot"]);

        assert_eq!(mounts.for_step(true).len(), 1);
        assert_eq!(mounts.for_step(false).len(), 2);
        assert_eq!(mounts.volumes().count(), 2);

        let shoot = &mounts.untrusted[0];
        assert_eq!(shoot.volume.name, "kubeconfig-shoot");
        assert_eq!(shoot.mount.mount_path, "/tmp/env/kubeconfigs/shoot");
        assert!(shoot.mount.read_only);
    }

    #[test]
    fn test_token_mount_projects_token() {
        let testrun = testrun_with(vec![(
            "gardener",
            KubeconfigSource::ServiceAccountToken(ProjectedToken {
                kubeconfig_secret: KeyRef::new("garden-kc", "kubeconfig"),
                audience: None,
                expiration_seconds: None,
            }),
        )]);
        let mounts = SpecCredentialProvider.parse(&testrun).unwrap().mounts();
        assert!(mounts.untrusted.is_empty());

        match &mounts.trusted[0].volume.source {
            VolumeSource::Projected(projected) => {
                assert_eq!(projected.sources.len(), 2);
                let token = projected.sources[1].service_account_token.as_ref().unwrap();
                assert_eq!(token.path, "token");
            }
            other => panic!("expected projected volume, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_name_rejected() {
        let testrun = testrun_with(vec![(
            "Shoot_1",
            KubeconfigSource::Secret(KeyRef::new("s", "k")),
        )]);
        let err = SpecCredentialProvider.parse(&testrun).unwrap_err();
        assert!(matches!(err, Error::Credentials(_)));
        assert_eq!(err.reason(), "CredentialError");
    }

    #[test]
    fn test_empty_secret_ref_rejected() {
        let testrun = testrun_with(vec![(
            "shoot",
            KubeconfigSource::Secret(KeyRef::new("", "k")),
        )]);
        assert!(SpecCredentialProvider.parse(&testrun).is_err());
    }

    #[test]
    fn test_no_kubeconfigs() {
        let credentials = SpecCredentialProvider
            .parse(&Testrun::new("tr", TestrunSpec::default()))
            .unwrap();
        assert!(credentials.is_empty());
        assert_eq!(credentials.mounts(), CredentialMounts::default());
    }
}
