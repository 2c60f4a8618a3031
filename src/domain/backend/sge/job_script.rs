use std::path::Path;

use crate::domain::job_graph::task::TaskDescriptor;

/// Options shared by all job scripts of one SGE backend.
#[derive(Debug, Clone)]
pub struct SgeScriptOptions {
    pub queue: Option<String>,
    pub parallel_env: String,
}

/// Renders a qsub script for `task`. Output and error streams are joined
/// into `output_file`; memory is requested per slot as SGE expects.
pub fn render_job_script(task: &TaskDescriptor, options: &SgeScriptOptions, output_file: &Path) -> String {
    let resources = &task.resources;
    let cores = resources.cores.max(1);
    let memory_per_slot = resources.memory_mb.div_ceil(u64::from(cores));

    let mut lines = vec![
        "#!/bin/bash".to_string(),
        format!("#$ -N {}", task.job_name()),
        "#$ -S /bin/bash".to_string(),
        "#$ -V".to_string(),
        "#$ -j y".to_string(),
        "#$ -cwd".to_string(),
        format!("#$ -o {}", output_file.display()),
    ];
    if let Some(queue) = &options.queue {
        lines.push(format!("#$ -q {}", queue));
    }
    if cores > 1 {
        lines.push(format!("#$ -pe {} {}", options.parallel_env, cores));
    }
    lines.push(format!("#$ -l h_vmem={}M", memory_per_slot));
    lines.push(format!("#$ -l h_rt={}", format_wall_time(resources.wall_time_s)));
    lines.push(String::new());
    lines.push("set -e".to_string());
    lines.push(task.command.clone());
    lines.push(String::new());

    lines.join("\n")
}

fn format_wall_time(seconds: u64) -> String {
    format!("{:02}:{:02}:{:02}", seconds / 3600, (seconds % 3600) / 60, seconds % 60)
}
