//! User requirement: the immutable input to a case run.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::{FoamError, Result};

/// Declared format of a user-supplied mesh file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeshFormat {
    /// Gmsh `.msh`
    Msh,
    Stl,
    Obj,
    /// Native polyMesh files
    Foam,
}

impl MeshFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeshFormat::Msh => "msh",
            MeshFormat::Stl => "stl",
            MeshFormat::Obj => "obj",
            MeshFormat::Foam => "foam",
        }
    }
}

impl fmt::Display for MeshFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeshFormat {
    type Err = FoamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "msh" | "gmsh" => Ok(MeshFormat::Msh),
            "stl" => Ok(MeshFormat::Stl),
            "obj" => Ok(MeshFormat::Obj),
            "foam" | "polymesh" => Ok(MeshFormat::Foam),
            other => Err(FoamError::InvalidRequirement(format!(
                "unsupported mesh format: {other}"
            ))),
        }
    }
}

/// Reference to a mesh file provided by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomMesh {
    pub path: PathBuf,
    pub format: MeshFormat,
}

impl CustomMesh {
    pub fn new(path: impl Into<PathBuf>, format: MeshFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    /// File name the mesh gets inside the case directory.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// One-line description handed to the generator.
    pub fn describe(&self) -> String {
        format!(
            "{} ({} format), copied into the case root; do not generate mesh-definition files",
            self.file_name().unwrap_or("mesh"),
            self.format
        )
    }
}

/// Natural-language simulation requirement plus an optional custom mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRequirement {
    text: String,
    custom_mesh: Option<CustomMesh>,
}

impl UserRequirement {
    /// Accept a requirement. Blank text is rejected.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(FoamError::InvalidRequirement(
                "requirement text must not be empty".to_string(),
            ));
        }
        Ok(Self {
            text,
            custom_mesh: None,
        })
    }

    pub fn with_custom_mesh(mut self, mesh: CustomMesh) -> Self {
        self.custom_mesh = Some(mesh);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn custom_mesh(&self) -> Option<&CustomMesh> {
        self.custom_mesh.as_ref()
    }

    /// Mesh path, if one was supplied.
    pub fn mesh_path(&self) -> Option<&Path> {
        self.custom_mesh.as_ref().map(|m| m.path.as_path())
    }
}
