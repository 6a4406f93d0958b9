use std::path::PathBuf;

use anyhow::{ensure, Context};
use clap::ArgMatches;
use ptmrs_core::{
    modification::{Definition, ModificationRegistry},
    settings::{Builder, Settings},
};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
/// Actual localization parameters - may include overrides or default values not set by user
pub struct Search {
    pub version: String,
    pub settings: Settings,
    pub modifications: Vec<Definition>,
    pub psm_paths: Vec<String>,
    pub output_paths: Vec<String>,

    #[serde(skip_serializing)]
    pub output_directory: PathBuf,
}

impl Search {
    pub fn registry(&self) -> ModificationRegistry {
        ModificationRegistry::from_definitions(self.modifications.clone())
    }
}

#[derive(Deserialize)]
/// Input parameters deserialized from JSON file
pub struct Input {
    settings: Option<Builder>,
    modifications: Option<Vec<Definition>>,
    psm_paths: Option<Vec<String>>,
    output_directory: Option<String>,
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let path = matches
            .get_one::<String>("parameters")
            .context("required parameters")?;
        let mut input = Input::load(path)
            .with_context(|| format!("Failed to read parameters from `{path}`"))?;

        // Handle JSON configuration overrides
        if let Some(output_directory) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `output_directory` parameter.");
            input.output_directory = Some(output_directory.into());
        }
        if let Some(psm_paths) = matches.get_many::<String>("psm_paths") {
            log::trace!("overriding `psm_paths` parameter.");
            input.psm_paths = Some(psm_paths.into_iter().map(|p| p.into()).collect());
        }
        if let Some(threads) = matches.get_one::<u16>("threads").copied() {
            log::trace!("overriding `settings.max_tasks` parameter.");
            input.settings.get_or_insert_with(Builder::default).max_tasks = Some(threads as usize);
        }

        ensure!(
            input.psm_paths.as_ref().is_some_and(|p| !p.is_empty()),
            "`psm_paths` must be set. For more information try '--help'"
        );

        Ok(input)
    }

    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        ptmrs_core::read_json(path.as_ref()).map_err(anyhow::Error::from)
    }

    pub fn build(self) -> anyhow::Result<Search> {
        let settings = self.settings.unwrap_or_default().make_settings();
        let modifications = self.modifications.unwrap_or_default();
        if modifications.is_empty() {
            log::warn!("no modifications are defined: every PSM will be reported as unmodified");
        }

        let psm_paths = self
            .psm_paths
            .context("`psm_paths` must be provided")?;

        let output_directory = match self.output_directory {
            Some(path) => {
                let path = PathBuf::from(path);
                std::fs::create_dir_all(&path)
                    .with_context(|| format!("Failed to create `{}`", path.display()))?;
                path
            }
            None => std::env::current_dir()?,
        };

        Ok(Search {
            version: clap::crate_version!().into(),
            settings,
            modifications,
            psm_paths,
            output_paths: Vec::new(),
            output_directory,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() -> anyhow::Result<()> {
        let input: Input = serde_json::from_str(
            r#"{
                "settings": { "max_peak_depth": 6, "fragment_tol": { "da": [-0.02, 0.02] } },
                "modifications": [
                    { "id": 1, "name": "Phospho", "mass": 79.966331, "targets": ["S", "T", "Y"] }
                ],
                "psm_paths": ["psms.json"]
            }"#,
        )?;
        let search = input.build()?;
        assert_eq!(search.settings.max_peak_depth, 6);
        assert_eq!(search.settings.min_peak_depth, 2);
        assert_eq!(search.registry().scored().count(), 1);
        assert_eq!(search.psm_paths, vec!["psms.json".to_string()]);
        assert_eq!(search.output_directory, std::env::current_dir()?);

        let json = serde_json::to_value(&search)?;
        assert!(json.get("output_directory").is_none());
        assert_eq!(json["settings"]["max_isoforms"], 200);
        Ok(())
    }
}
