//! File-role ontology and dependency ordering of subtasks.
//!
//! Dependencies are not inferred from file content. Every file is mapped to
//! a [`FileRole`], and a fixed, versioned [`DependencyRuleTable`] states
//! which roles must be generated before which. An edge `A -> B` means B
//! depends on A.
//!
//! Generation order is computed with Kahn's algorithm, level by level.
//! Within a level subtasks keep their declaration order, so the resulting
//! order is deterministic: dependency depth first, declaration order second.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::{ArtifactId, FoamError, Result, Subtask};

/// Functional role of a case file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    /// Mesh generation dictionaries and polyMesh files.
    MeshDefinition,
    /// `constant/` material and model properties.
    PhysicalProperties,
    /// Initial and boundary fields under `0/`.
    BoundaryConditions,
    /// Field initialisation utilities such as `setFieldsDict`.
    FieldInitialisation,
    /// `system/` dictionaries that steer the solver.
    SolverControl,
    /// Run scripts.
    RunControl,
    Auxiliary,
}

const MESH_DICTS: &[&str] = &[
    "blockMeshDict",
    "snappyHexMeshDict",
    "extrudeMeshDict",
    "surfaceFeatureExtractDict",
    "surfaceFeaturesDict",
    "topoSetDict",
    "createPatchDict",
    "refineMeshDict",
];

/// Case directories written by meshing utilities, never by generation.
pub const MESH_DIRECTORIES: &[&str] = &["constant/polyMesh", "constant/triSurface", "constant/geometry"];

const FIELD_INIT_DICTS: &[&str] = &["setFieldsDict", "mapFieldsDict", "setExprFieldsDict"];

const RUN_SCRIPTS: &[&str] = &["Allrun", "Allclean", "Allrun.pre", "Allrun.post"];

impl FileRole {
    pub const ALL: [FileRole; 7] = [
        FileRole::MeshDefinition,
        FileRole::PhysicalProperties,
        FileRole::BoundaryConditions,
        FileRole::FieldInitialisation,
        FileRole::SolverControl,
        FileRole::RunControl,
        FileRole::Auxiliary,
    ];

    /// Role of a case-relative file path.
    pub fn classify(file_path: &str) -> Self {
        let path = file_path.trim_start_matches("./");
        let (folder, name) = match path.rsplit_once('/') {
            Some((folder, name)) => (folder, name),
            None => ("", path),
        };
        let top = folder.split('/').next().unwrap_or("");

        if MESH_DICTS.contains(&name) || MESH_DIRECTORIES.iter().any(|d| folder.starts_with(d)) {
            return FileRole::MeshDefinition;
        }
        if FIELD_INIT_DICTS.contains(&name) {
            return FileRole::FieldInitialisation;
        }
        if folder.is_empty() && RUN_SCRIPTS.contains(&name) {
            return FileRole::RunControl;
        }
        match top {
            "0" | "0.orig" => FileRole::BoundaryConditions,
            "constant" => FileRole::PhysicalProperties,
            "system" => FileRole::SolverControl,
            _ => FileRole::Auxiliary,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileRole::MeshDefinition => "mesh_definition",
            FileRole::PhysicalProperties => "physical_properties",
            FileRole::BoundaryConditions => "boundary_conditions",
            FileRole::FieldInitialisation => "field_initialisation",
            FileRole::SolverControl => "solver_control",
            FileRole::RunControl => "run_control",
            FileRole::Auxiliary => "auxiliary",
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `dependent` may only be generated after every file with a role in `requires`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRule {
    pub dependent: FileRole,
    pub requires: Vec<FileRole>,
    pub rationale: String,
}

/// Versioned role-to-role dependency table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRuleTable {
    pub version: String,
    pub rules: Vec<DependencyRule>,
}

impl Default for DependencyRuleTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl DependencyRuleTable {
    pub fn standard() -> Self {
        let rule = |dependent, requires: &[FileRole], rationale: &str| DependencyRule {
            dependent,
            requires: requires.to_vec(),
            rationale: rationale.to_string(),
        };
        Self {
            version: "v1".to_string(),
            rules: vec![
                rule(
                    FileRole::BoundaryConditions,
                    &[FileRole::MeshDefinition, FileRole::PhysicalProperties],
                    "boundary fields name the mesh patches and use the declared properties",
                ),
                rule(
                    FileRole::FieldInitialisation,
                    &[FileRole::MeshDefinition, FileRole::BoundaryConditions],
                    "initialisation edits existing fields inside mesh regions",
                ),
                rule(
                    FileRole::SolverControl,
                    &[FileRole::BoundaryConditions, FileRole::PhysicalProperties],
                    "schemes and solvers cover every field and model in use",
                ),
                rule(
                    FileRole::RunControl,
                    &[
                        FileRole::MeshDefinition,
                        FileRole::FieldInitialisation,
                        FileRole::SolverControl,
                        FileRole::Auxiliary,
                    ],
                    "the run script invokes the utilities configured upstream",
                ),
            ],
        }
    }

    /// Roles `role` must wait for.
    pub fn requirements_for(&self, role: FileRole) -> BTreeSet<FileRole> {
        self.rules
            .iter()
            .filter(|r| r.dependent == role)
            .flat_map(|r| r.requires.iter().copied())
            .filter(|r| *r != role)
            .collect()
    }

    /// Replace every subtask's `depends_on` with the edges the table implies.
    pub fn assign(&self, subtasks: &mut [Subtask]) {
        let by_role: Vec<(FileRole, ArtifactId)> = subtasks
            .iter()
            .map(|s| (s.role, s.artifact_id.clone()))
            .collect();
        for subtask in subtasks.iter_mut() {
            let required = self.requirements_for(subtask.role);
            subtask.depends_on = by_role
                .iter()
                .filter(|(role, id)| required.contains(role) && *id != subtask.artifact_id)
                .map(|(_, id)| id.clone())
                .collect();
        }
    }

    /// Dependencies a new subtask with `role` gets inside an existing plan.
    pub fn dependencies_within(&self, role: FileRole, subtasks: &[Subtask]) -> BTreeSet<ArtifactId> {
        let required = self.requirements_for(role);
        subtasks
            .iter()
            .filter(|s| required.contains(&s.role))
            .map(|s| s.artifact_id.clone())
            .collect()
    }

    /// The table itself must be acyclic over roles.
    pub fn validate(&self) -> Result<()> {
        let mut probe: Vec<Subtask> = FileRole::ALL
            .iter()
            .map(|role| {
                let mut s = Subtask::new(role.as_str());
                s.role = *role;
                s
            })
            .collect();
        self.assign(&mut probe);
        generation_levels(&probe).map(|_| ())
    }
}

/// Group subtask indices into dependency levels (Kahn's algorithm).
///
/// Level 0 holds subtasks without dependencies; level `n` holds subtasks
/// whose deepest dependency sits on level `n - 1`. Indices inside a level
/// are in declaration order.
pub fn generation_levels(subtasks: &[Subtask]) -> Result<Vec<Vec<usize>>> {
    let index: HashMap<&ArtifactId, usize> = subtasks
        .iter()
        .enumerate()
        .map(|(i, s)| (&s.artifact_id, i))
        .collect();

    let mut in_degree = vec![0usize; subtasks.len()];
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); subtasks.len()];
    for (i, s) in subtasks.iter().enumerate() {
        for dep in &s.depends_on {
            let Some(&j) = index.get(dep) else {
                return Err(FoamError::UnknownDependency {
                    artifact: s.artifact_id.to_string(),
                    missing: dep.to_string(),
                });
            };
            if j == i {
                return Err(FoamError::DependencyCycle {
                    artifacts: vec![s.artifact_id.to_string()],
                });
            }
            in_degree[i] += 1;
            downstream[j].push(i);
        }
    }

    let mut levels = Vec::new();
    let mut current: Vec<usize> = (0..subtasks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut placed = 0usize;

    while !current.is_empty() {
        placed += current.len();
        let mut next = Vec::new();
        for &i in &current {
            for &d in &downstream[i] {
                in_degree[d] -= 1;
                if in_degree[d] == 0 {
                    next.push(d);
                }
            }
        }
        next.sort_unstable();
        levels.push(std::mem::replace(&mut current, next));
    }

    if placed != subtasks.len() {
        let artifacts = subtasks
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, s)| s.artifact_id.to_string())
            .collect();
        return Err(FoamError::DependencyCycle { artifacts });
    }
    Ok(levels)
}

/// Flattened generation order (indices into `subtasks`).
pub fn generation_order(subtasks: &[Subtask]) -> Result<Vec<usize>> {
    Ok(generation_levels(subtasks)?.into_iter().flatten().collect())
}
