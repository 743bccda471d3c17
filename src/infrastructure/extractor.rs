//! 提取子进程命令 - 基础设施层
//!
//! 构造并启动一次提取子进程调用。子进程是不透明的外部协作者：
//! 它唯一的信号就是行式日志输出和退出码（契约见批次流程层）。

use crate::config::Config;
use crate::error::{AppResult, RunnerError};
use crate::models::BatchTask;
use std::process::Stdio;
use tokio::process::Child;
use tokio::process::Command;

/// 提取子进程命令
pub struct ExtractorCommand {
    program: String,
    script: String,
    input_file: String,
}

impl ExtractorCommand {
    pub fn from_config(config: &Config) -> Self {
        Self {
            program: config.extractor_program.clone(),
            script: config.extractor_script.clone(),
            input_file: config.extractor_input_file.clone(),
        }
    }

    /// 完整命令行描述（用于日志）
    pub fn describe(&self, task: &BatchTask) -> String {
        format!(
            "{} {} --input-file {} --start-index {} --target-videos {}",
            self.program, self.script, self.input_file, task.start, task.size
        )
    }

    /// 为指定批次任务启动子进程，stdout/stderr 均接管为管道
    pub fn spawn(&self, task: &BatchTask) -> AppResult<Child> {
        let child = Command::new(&self.program)
            .arg(&self.script)
            .arg("--input-file")
            .arg(&self.input_file)
            .arg("--start-index")
            .arg(task.start.to_string())
            .arg("--target-videos")
            .arg(task.size.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::SpawnFailed {
                program: self.program.clone(),
                source,
            })?;
        Ok(child)
    }
}
