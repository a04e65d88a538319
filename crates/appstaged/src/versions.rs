//! Version listing and switching for production and staging apps

use appstage_core::{
    parse_app_path, AppEntry, AppFile, AppVersion, Error, Result, VersionSwitchResponse,
    VersionTarget,
};
use appstage_db::VersionStore;
use tracing::info;

use crate::server::{Operation, Server};

impl Server {
    async fn versioned_app(&self, op: &mut Operation, path: &str) -> Result<AppEntry> {
        let apd = parse_app_path(path)?;
        let entry = self.db.apps().require(&mut op.tx, &apd).await?;
        if entry.is_dev {
            return Err(Error::DevAppUnsupported(apd.to_string()));
        }
        Ok(entry)
    }

    /// Stored versions of an app, newest first, with the current one flagged
    pub async fn version_list(&self, path: &str) -> Result<Vec<AppVersion>> {
        let mut op = self.begin().await?;
        let entry = self.versioned_app(&mut op, path).await?;
        let mut versions = VersionStore::new(entry.id.clone())
            .list_versions(&mut op.tx)
            .await?;
        for version in &mut versions {
            version.active = version.version == entry.version();
        }
        Ok(versions)
    }

    /// Files of a version, the current one when `version` is unset
    pub async fn version_files(
        &self,
        path: &str,
        version: Option<i64>,
    ) -> Result<(i64, Vec<AppFile>)> {
        let mut op = self.begin().await?;
        let entry = self.versioned_app(&mut op, path).await?;
        let version = version.unwrap_or_else(|| entry.version());

        let store = VersionStore::new(entry.id.clone());
        if store.get_app_version(&mut op.tx, version).await?.is_none() {
            return Err(Error::InvalidVersion(format!(
                "version {} not found for app {}",
                version,
                entry.app_path_domain()
            )));
        }
        let files = store.list_files(&mut op.tx, version).await?;
        Ok((version, files))
    }

    /// Point an app at another stored version
    pub async fn version_switch(
        &self,
        path: &str,
        dry_run: bool,
        target: VersionTarget,
    ) -> Result<VersionSwitchResponse> {
        let _gate = self.write_gate().await;
        let mut op = self.begin().await?;
        let mut entry = self.versioned_app(&mut op, path).await?;
        let store = VersionStore::new(entry.id.clone());
        let from = entry.version();

        let to = match target {
            VersionTarget::Revert => {
                let previous = entry.metadata.version_metadata.previous_version;
                if previous == 0 {
                    return Err(Error::InvalidVersion(
                        "no version found to revert to".to_string(),
                    ));
                }
                previous
            }
            VersionTarget::Version(v) => v,
            VersionTarget::Next | VersionTarget::Previous => {
                let versions = store.list_versions(&mut op.tx).await?;
                let found = if target == VersionTarget::Next {
                    versions.iter().map(|v| v.version).filter(|v| *v > from).min()
                } else {
                    versions.iter().map(|v| v.version).filter(|v| *v < from).max()
                };
                found.ok_or_else(|| {
                    Error::InvalidVersion(format!(
                        "no {} version of app {} from version {}",
                        if target == VersionTarget::Next { "next" } else { "previous" },
                        entry.app_path_domain(),
                        from
                    ))
                })?
            }
        };

        let version = store.get_app_version(&mut op.tx, to).await?.ok_or_else(|| {
            Error::InvalidVersion(format!(
                "version {} not found for app {}",
                to,
                entry.app_path_domain()
            ))
        })?;

        entry.metadata = version.metadata;
        entry.metadata.version_metadata.version = to;
        entry.metadata.version_metadata.previous_version = from;
        self.db.apps().update_metadata(&mut op.tx, &entry).await?;

        let apd = entry.app_path_domain();
        self.complete_transaction(op, &[apd.clone()], dry_run).await?;
        info!("Switched {} from version {} to {}", apd, from, to);
        Ok(VersionSwitchResponse {
            dry_run,
            from_version: from,
            to_version: to,
        })
    }
}
