use lumen_core::{FileUri, Project, ProjectId};

/// A change event emitted by the external project model or file watcher,
/// consumed by the reconcile scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    ProjectCreated(Project),
    ProjectChanged(Project),
    ProjectDeleted(ProjectId),
    FileCreated { project: ProjectId, uri: FileUri },
    FileChanged { project: ProjectId, uri: FileUri },
    FileDeleted { project: ProjectId, uri: FileUri },
}

impl ChangeEvent {
    pub fn project_id(&self) -> &ProjectId {
        match self {
            ChangeEvent::ProjectCreated(project) | ChangeEvent::ProjectChanged(project) => {
                &project.id
            }
            ChangeEvent::ProjectDeleted(id) => id,
            ChangeEvent::FileCreated { project, .. }
            | ChangeEvent::FileChanged { project, .. }
            | ChangeEvent::FileDeleted { project, .. } => project,
        }
    }
}
