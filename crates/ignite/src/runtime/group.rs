//! Group orchestration: build members from a launch file, start and stop them in order

use crate::config::{
    mergevars, Environment, GroupNames, LaunchFile, LaunchFileError, ProgramConfig,
};
use crate::plugin::{GroupHook, HookDispatcher, PluginError, PluginRegistry, ProgramHook};
use crate::runtime::dependency::{DependencyError, DependencyGraph};
use crate::runtime::output::{ColorAllocator, Output};
use crate::runtime::process::{Program, ProgramSpec, RestartPolicy, DEFAULT_STOP_TIMEOUT};
use indexmap::IndexMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Settings shared by every group built from one launch file
#[derive(Debug, Clone)]
pub struct GroupOptions {
    /// Plugins that launch files may name
    pub registry: PluginRegistry,
    /// Console shared by all programs
    pub output: Arc<Output>,
    /// Graceful-stop window per program
    pub stop_timeout: Duration,
    /// Wrap console programs in `stdbuf -oL` on Linux
    pub line_buffering: bool,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            registry: PluginRegistry::builtin(),
            output: Arc::new(Output::stdout(true)),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            line_buffering: true,
        }
    }
}

impl GroupOptions {
    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_output(mut self, output: Arc<Output>) -> Self {
        self.output = output;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_line_buffering(mut self, enabled: bool) -> Self {
        self.line_buffering = enabled;
        self
    }
}

/// Group-level settings, after inheritance from the including group
#[derive(Debug, Clone, Default)]
pub struct GroupInfo {
    pub name: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Directory receiving `<program>.log`
    pub log: Option<PathBuf>,
    pub user: Option<String>,
    pub group: Option<GroupNames>,
    pub environment: Environment,
    /// Launch file this group was read from
    pub source: Option<PathBuf>,
}

impl GroupInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Title, falling back to the name
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    /// Apply a launch file's own settings over inherited defaults
    fn inherit(
        name: &str,
        launch: &LaunchFile,
        parent: &GroupInfo,
        source: Option<PathBuf>,
    ) -> Self {
        Self {
            name: name.to_string(),
            title: launch.title.clone(),
            description: launch.description.clone(),
            log: launch
                .log
                .as_ref()
                .map(PathBuf::from)
                .or_else(|| parent.log.clone()),
            user: launch.user.clone().or_else(|| parent.user.clone()),
            group: launch.group.clone().or_else(|| parent.group.clone()),
            environment: mergevars(&parent.environment, &launch.environment),
            source,
        }
    }

    /// Defaults handed to a group included by the entry `config`
    fn include_context(&self, config: &ProgramConfig) -> Self {
        Self {
            name: self.name.clone(),
            title: None,
            description: None,
            log: config
                .log
                .as_ref()
                .map(PathBuf::from)
                .or_else(|| self.log.clone()),
            user: config.user.clone().or_else(|| self.user.clone()),
            group: config.group.clone().or_else(|| self.group.clone()),
            environment: mergevars(&self.environment, &config.environment),
            source: None,
        }
    }

    /// Directory include paths are relative to
    fn base_dir(&self) -> PathBuf {
        self.source
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// A nested group taking part in its parent's sequence as a single member
#[derive(Debug)]
pub struct IncludedGroup {
    pub group: Group,
    pub required: bool,
    pub depends: Vec<String>,
}

/// One entry of a group
#[derive(Debug)]
pub enum Member {
    Program(Program),
    Group(IncludedGroup),
}

impl Member {
    pub fn required(&self) -> bool {
        match self {
            Member::Program(program) => program.spec().required,
            Member::Group(included) => included.required,
        }
    }

    pub fn depends(&self) -> &[String] {
        match self {
            Member::Program(program) => &program.spec().depends,
            Member::Group(included) => &included.depends,
        }
    }

    pub fn valid(&self) -> bool {
        match self {
            Member::Program(program) => program.valid(),
            Member::Group(included) => included.group.valid(),
        }
    }
}

/// A set of programs started in dependency order and stopped in reverse
#[derive(Debug)]
pub struct Group {
    info: GroupInfo,
    hooks: Arc<HookDispatcher>,
    members: IndexMap<String, Member>,
    sequence: Vec<String>,
    output: Arc<Output>,
}

impl Group {
    /// Read a launch file and build the group it describes, includes and all
    pub async fn load(
        path: impl AsRef<Path>,
        options: &GroupOptions,
    ) -> Result<Self, GroupError> {
        let path = path.as_ref();
        let launch = LaunchFile::from_file(path)?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "launch".to_string());

        let mut colors = ColorAllocator::new();
        Self::build(
            name,
            launch,
            Some(path.to_path_buf()),
            GroupInfo::default(),
            options,
            &mut colors,
        )
        .await
    }

    /// Build a group from an already parsed launch file.
    ///
    /// Includes are resolved relative to the current directory.
    pub async fn from_launch_file(
        name: &str,
        launch: LaunchFile,
        options: &GroupOptions,
    ) -> Result<Self, GroupError> {
        launch.validate()?;
        let mut colors = ColorAllocator::new();
        Self::build(
            name.to_string(),
            launch,
            None,
            GroupInfo::default(),
            options,
            &mut colors,
        )
        .await
    }

    fn build<'a>(
        name: String,
        launch: LaunchFile,
        source: Option<PathBuf>,
        parent: GroupInfo,
        options: &'a GroupOptions,
        colors: &'a mut ColorAllocator,
    ) -> BoxFuture<'a, Result<Self, GroupError>> {
        Box::pin(async move {
            let info = GroupInfo::inherit(&name, &launch, &parent, source);
            let hooks = Arc::new(options.registry.dispatcher(&launch.plugins)?);

            // Ordering problems abort before anything is built
            let graph = DependencyGraph::new(
                launch
                    .active_programs()
                    .map(|(name, config)| (name.clone(), config.depends.clone())),
            )?;
            let sequence = graph.startup_sequence()?;

            let mut members = IndexMap::new();
            for (id, config) in launch.active_programs() {
                let member = match &config.include {
                    Some(include) => {
                        let path = info.base_dir().join(include);
                        let context = info.include_context(config);
                        let group = Self::include(id, &path, context, options, colors)
                            .await
                            .map_err(|e| GroupError::Include {
                                path: path.display().to_string(),
                                source: Box::new(e),
                            })?;

                        Member::Group(IncludedGroup {
                            group,
                            required: config.required,
                            depends: config.depends.clone(),
                        })
                    }
                    None => {
                        let mut spec = ProgramSpec::resolve(id, config, &info);
                        hooks.program_init(&mut spec).await;

                        let program =
                            Program::new(spec, colors.allocate(), options.output.clone())
                                .with_stop_timeout(options.stop_timeout)
                                .with_line_buffering(options.line_buffering);
                        Member::Program(program)
                    }
                };
                members.insert(id.clone(), member);
            }

            log::debug!(
                "Group '{}' startup sequence: {}",
                info.name,
                sequence.join(", ")
            );

            let mut group = Group {
                info,
                hooks: hooks.clone(),
                members,
                sequence,
                output: options.output.clone(),
            };

            hooks.group(GroupHook::Init, &mut group).await;

            Ok(group)
        })
    }

    async fn include(
        name: &str,
        path: &Path,
        context: GroupInfo,
        options: &GroupOptions,
        colors: &mut ColorAllocator,
    ) -> Result<Self, GroupError> {
        log::debug!("Including {} as '{}'", path.display(), name);
        let launch = LaunchFile::from_file(path)?;
        Self::build(
            name.to_string(),
            launch,
            Some(path.to_path_buf()),
            context,
            options,
            colors,
        )
        .await
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &GroupInfo {
        &self.info
    }

    /// Member names in startup order
    pub fn sequence(&self) -> &[String] {
        &self.sequence
    }

    pub fn members(&self) -> &IndexMap<String, Member> {
        &self.members
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    /// Direct program member
    pub fn program(&self, name: &str) -> Option<&Program> {
        match self.members.get(name)? {
            Member::Program(program) => Some(program),
            Member::Group(_) => None,
        }
    }

    /// Direct group member
    pub fn subgroup(&self, name: &str) -> Option<&Group> {
        match self.members.get(name)? {
            Member::Group(included) => Some(&included.group),
            Member::Program(_) => None,
        }
    }

    /// Every program in this group and its included groups, in startup order
    pub fn programs(&self) -> Vec<&Program> {
        let mut programs = Vec::new();
        for name in &self.sequence {
            match self.members.get(name) {
                Some(Member::Program(program)) => programs.push(program),
                Some(Member::Group(included)) => programs.extend(included.group.programs()),
                None => {}
            }
        }
        programs
    }

    /// Plugin names, in dispatch order
    pub fn plugins(&self) -> Vec<&str> {
        self.hooks.names()
    }

    /// Print a banner line on the shared console
    pub fn announce(&self, message: &str) {
        self.output.banner(message);
    }

    /// Start every member in dependency order.
    ///
    /// Programs are not waited on; only plugin hooks can hold the sequence.
    pub fn start(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let hooks = self.hooks.clone();
            hooks.group(GroupHook::Start, self).await;

            for name in self.sequence.clone() {
                match self.members.get_mut(&name) {
                    Some(Member::Program(program)) => {
                        hooks.program(ProgramHook::Start, program).await;
                        program.start();
                        hooks.program(ProgramHook::Started, program).await;
                    }
                    Some(Member::Group(included)) => included.group.start().await,
                    None => {}
                }
            }

            hooks.group(GroupHook::Started, self).await;
        })
    }

    /// Stop every member in reverse dependency order
    pub fn stop(&mut self, force: bool) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let hooks = self.hooks.clone();
            hooks.group(GroupHook::Stop, self).await;

            for name in self.sequence.clone().iter().rev() {
                match self.members.get_mut(name) {
                    Some(Member::Program(program)) => {
                        hooks.program(ProgramHook::Stop, program).await;
                        program.stop(force).await;
                        hooks.program(ProgramHook::Stopped, program).await;
                    }
                    Some(Member::Group(included)) => included.group.stop(force).await,
                    None => {}
                }
            }

            hooks.group(GroupHook::Stopped, self).await;
        })
    }

    /// Healthy while at least one member is valid and no required member is not
    pub fn valid(&self) -> bool {
        let mut any_valid = false;
        for member in self.members.values() {
            if member.valid() {
                any_valid = true;
            } else if member.required() {
                return false;
            }
        }
        any_valid
    }

    /// Describe what `start` would run, without running anything
    pub fn plan(&self) -> LaunchPlan {
        let mut entries = Vec::new();
        self.collect_plan("", &mut entries);

        LaunchPlan {
            title: self.info.display_title().to_string(),
            description: self.info.description.clone(),
            plugins: self.plugins().into_iter().map(String::from).collect(),
            entries,
        }
    }

    fn collect_plan(&self, prefix: &str, entries: &mut Vec<LaunchPlanEntry>) {
        for name in &self.sequence {
            let qualified = format!("{}{}", prefix, name);
            match self.members.get(name) {
                Some(Member::Program(program)) => {
                    let spec = program.spec();
                    let environment = spec.materialized_environment();
                    let command = match spec.argv(&environment, false) {
                        Ok(argv) => shell_words::join(argv),
                        Err(e) => format!("<{}>", e),
                    };

                    entries.push(LaunchPlanEntry {
                        name: qualified,
                        command,
                        directory: spec.working_directory(&environment),
                        depends: spec.depends.clone(),
                        restart: spec.restart,
                        required: spec.required,
                        log: spec.log.clone(),
                    });
                }
                Some(Member::Group(included)) => {
                    included
                        .group
                        .collect_plan(&format!("{}/", qualified), entries);
                }
                None => {}
            }
        }
    }
}

/// Dry-run view of a group
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub title: String,
    pub description: Option<String>,
    pub plugins: Vec<String>,
    /// Programs in startup order; included programs are named `group/program`
    pub entries: Vec<LaunchPlanEntry>,
}

/// One program in a launch plan
#[derive(Debug, Clone)]
pub struct LaunchPlanEntry {
    pub name: String,
    pub command: String,
    pub directory: PathBuf,
    pub depends: Vec<String>,
    pub restart: RestartPolicy,
    pub required: bool,
    pub log: Option<PathBuf>,
}

impl std::fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Launch plan: {}", self.title)?;
        if let Some(description) = &self.description {
            writeln!(f, "  {}", description)?;
        }
        if !self.plugins.is_empty() {
            writeln!(f, "Plugins: {}", self.plugins.join(", "))?;
        }

        for (i, entry) in self.entries.iter().enumerate() {
            write!(f, "\n{:>3}. {}", i + 1, entry.name)?;
            if entry.required {
                write!(f, " (required)")?;
            }
            writeln!(f)?;
            writeln!(f, "     command:   {}", entry.command)?;
            writeln!(f, "     directory: {}", entry.directory.display())?;
            writeln!(f, "     restart:   {}", entry.restart)?;
            if !entry.depends.is_empty() {
                writeln!(f, "     depends:   {}", entry.depends.join(", "))?;
            }
            if let Some(log) = &entry.log {
                writeln!(f, "     log:       {}", log.display())?;
            }
        }

        Ok(())
    }
}

/// Errors raised while building a group
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error(transparent)]
    LaunchFile(#[from] LaunchFileError),

    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("Unable to load included launch file '{path}': {source}")]
    Include {
        path: String,
        #[source]
        source: Box<GroupError>,
    },
}
