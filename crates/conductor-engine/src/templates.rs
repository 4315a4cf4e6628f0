//! Built-in task-graph templates.
//!
//! Each factory returns a fresh graph per call. Slot parameters are embedded
//! as `#`-protected literals so user-supplied text is never read as a
//! context reference.

use serde_json::Value;

use conductor_core::error::{ConductorError, Result};
use conductor_core::types::{
    ActionNode, Args, DecisionNode, FallbackAction, FunctionNode, Node, TaskGraph,
};

use crate::registry::TemplateRegistry;

/// Register every built-in template.
pub fn register_builtins(registry: &mut TemplateRegistry) {
    registry.register("prepare_work_environment", |_| Ok(prepare_work_environment()), &[]);
    registry.register("setup_video_player", setup_video_player, &["folder_name"]);
    registry.register("open_copied_path", |_| Ok(open_copied_path()), &[]);
    registry.register("open_terminal_here", |_| Ok(open_terminal_here()), &[]);
    registry.register("start_project", |_| Ok(start_project()), &[]);
    registry.register("organize_folder", organize_folder, &["target_folder"]);
}

fn literal(text: &str) -> String {
    format!("#{text}")
}

fn string_param<'a>(template: &str, params: &'a Args, name: &str) -> Result<&'a str> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ConductorError::MissingTemplateParam {
            template: template.to_string(),
            param: name.to_string(),
        })
}

pub fn prepare_work_environment() -> TaskGraph {
    TaskGraph::new(
        "prepare_work_environment",
        "Prepare my work environment",
        "check_workspace",
    )
    .with_description("Open project folder and launch editor")
    .with_node(
        "check_workspace",
        DecisionNode::new("workspace_ready", "done", "open_folder"),
    )
    .with_node(
        "open_folder",
        ActionNode::new("open_folder", "launch_vscode", "abort")
            .with_arg("path", "~/projects")
            .with_retries(1),
    )
    .with_node(
        "launch_vscode",
        ActionNode::new("launch_app", "done", "abort").with_arg("app", "vscode"),
    )
    .with_node("done", Node::Noop)
    .with_node("abort", Node::abort("Workspace setup failed"))
}

pub fn setup_video_player(params: &Args) -> Result<TaskGraph> {
    let folder_name = string_param("setup_video_player", params, "folder_name")?;

    Ok(TaskGraph::new(
        "setup_video_player",
        format!("Prepare player to watch {folder_name}"),
        "check_player",
    )
    .with_description(format!("Open player with {folder_name} folder"))
    .with_node(
        "check_player",
        DecisionNode::new("player_ready", "done", "open_player"),
    )
    .with_node(
        "open_player",
        ActionNode::new("open_vlc", "done", "abort")
            .with_arg("folder_name", literal(folder_name))
            .with_retries(1),
    )
    .with_node("done", Node::Noop)
    .with_node(
        "abort",
        Node::abort(format!("{folder_name} player setup failed")),
    ))
}

pub fn open_copied_path() -> TaskGraph {
    TaskGraph::new(
        "open_copied_path",
        "Open copied file or folder",
        "get_copied_path",
    )
    .with_node(
        "get_copied_path",
        ActionNode::new("get_copied_value", "open_location", "abort")
            .with_arg("_as", "path")
            .with_output("file_path"),
    )
    .with_node(
        "open_location",
        ActionNode::new("open_folder", "done", "abort")
            .with_arg("folder_path", "@file_path::folder")
            .with_arg("select_file", "@file_path::file"),
    )
    .with_node("done", Node::Noop)
    .with_node("abort", Node::abort("Invalid copied path"))
}

pub fn open_terminal_here() -> TaskGraph {
    TaskGraph::new(
        "open_terminal_here",
        "Open terminal in active project",
        "get_active_instance",
    )
    .with_node(
        "get_active_instance",
        ActionNode::new("get_active_instance", "get_project_name", "abort")
            .with_output("active_instance"),
    )
    .with_node(
        "get_project_name",
        ActionNode::new("get_folder_name", "build_project_path", "abort")
            .with_arg("instance", "@active_instance")
            .with_output("project_name"),
    )
    .with_node(
        "build_project_path",
        FunctionNode::new("build_path", "open_terminal", "abort")
            .with_arg("parent_name", "projects")
            .with_arg("folder", "@project_name")
            .with_output("project_path"),
    )
    .with_node(
        "open_terminal",
        ActionNode::new("open_app", "done", "abort")
            .with_arg("app_name", "cmd")
            .with_arg("folder_path", "@project_path"),
    )
    .with_node("done", Node::Noop)
    .with_node("abort", Node::abort("Failed to open terminal"))
}

pub fn start_project() -> TaskGraph {
    TaskGraph::new("start_project", "Open a project workspace", "list_projects")
        .with_node(
            "list_projects",
            ActionNode::new("list_folder_contents", "select_project", "abort")
                .with_arg("folder_name", "projects")
                .with_fetch("folders")
                .with_output("project_folders"),
        )
        .with_node(
            "select_project",
            FunctionNode::new("fuzzy_select", "build_project_path", "abort")
                .with_arg("query", "@user_input")
                .with_arg("choices", "@project_folders")
                .with_output("project_name"),
        )
        .with_node(
            "build_project_path",
            FunctionNode::new("build_path", "focus_explorer", "abort")
                .with_arg("parent_name", "projects")
                .with_arg("folder", "@project_name")
                .with_output("project_path"),
        )
        .with_node(
            "focus_explorer",
            ActionNode::new("focus_app", "open_vscode", "open_explorer")
                .with_arg("app_name", "explorer")
                .with_arg("query", "@project_name"),
        )
        .with_node(
            "open_explorer",
            ActionNode::new("open_folder", "open_vscode", "abort")
                .with_arg("folder_path", "@project_path"),
        )
        .with_node(
            "open_vscode",
            ActionNode::new("open_focus_app", "done", "abort")
                .with_arg("app_name", "vscode")
                .with_arg("query", "@project_name")
                .with_arg("folder_path", "@project_path")
                .with_retries(1)
                .with_fallback(
                    FallbackAction::new("open_app")
                        .with_arg("app_name", "vscode")
                        .with_arg("folder_path", "@project_path"),
                ),
        )
        .with_node("done", Node::Noop)
        .with_node("abort", Node::abort("Failed to start project"))
}

pub fn organize_folder(params: &Args) -> Result<TaskGraph> {
    let target = string_param("organize_folder", params, "target_folder")?;

    Ok(
        TaskGraph::new("organize_folder", "Organize files in a folder", "list_items")
            .with_description(format!("Sort the contents of {target} into categories"))
            .with_node(
                "list_items",
                ActionNode::new("list_folder_contents", "categorize", "abort")
                    .with_arg("folder_name", literal(target))
                    .with_output("items"),
            )
            .with_node(
                "categorize",
                ActionNode::new("categorize_files", "move_files", "abort")
                    .with_arg("files", "@items")
                    .with_output("categorized"),
            )
            .with_node(
                "move_files",
                ActionNode::new("batch_move", "done", "abort").with_arg("mapping", "@categorized"),
            )
            .with_node("done", Node::Noop)
            .with_node("abort", Node::abort("Folder organization failed")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn all_targets_exist(graph: &TaskGraph) -> bool {
        graph.nodes.contains_key(&graph.entry)
            && graph
                .nodes
                .values()
                .flat_map(|n| n.transitions())
                .all(|(_, target)| graph.nodes.contains_key(target))
    }

    #[test]
    fn test_builtins_are_well_formed() {
        let registry = TemplateRegistry::with_builtins();
        let params = json!({"folder_name": "anime", "target_folder": "downloads"})
            .as_object()
            .cloned()
            .unwrap();
        for name in registry.names() {
            let graph = registry.instantiate(name, &params).unwrap();
            assert_eq!(graph.id, name);
            assert!(all_targets_exist(&graph), "{name} has dangling targets");
        }
    }

    #[test]
    fn test_slot_params_are_protected_literals() {
        let params = json!({"folder_name": "@evil"}).as_object().cloned().unwrap();
        let graph = setup_video_player(&params).unwrap();
        match graph.node("open_player") {
            Some(Node::Action(a)) => assert_eq!(a.args.get("folder_name"), Some(&json!("#@evil"))),
            _ => panic!("open_player should be an action"),
        }
        assert_eq!(graph.goal, "Prepare player to watch @evil");
    }

    #[test]
    fn test_non_string_param_rejected() {
        let params = json!({"target_folder": 42}).as_object().cloned().unwrap();
        assert!(matches!(
            organize_folder(&params),
            Err(ConductorError::MissingTemplateParam { .. })
        ));
    }

    #[test]
    fn test_start_project_shape() {
        let graph = start_project();
        assert_eq!(graph.entry, "list_projects");
        match graph.node("list_projects") {
            Some(Node::Action(a)) => {
                assert_eq!(a.fetch.as_deref(), Some("folders"));
                assert_eq!(a.output.as_deref(), Some("project_folders"));
            }
            _ => panic!("list_projects should be an action"),
        }
        match graph.node("select_project") {
            Some(Node::Function(f)) => {
                assert_eq!(f.args.get("choices"), Some(&json!("@project_folders")));
            }
            _ => panic!("select_project should be a function"),
        }
    }
}
