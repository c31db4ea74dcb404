//! Typed read and update operations against the harvesting dataset.
//!
//! Components never build query text themselves: they pick a [`ReadQuery`] or
//! [`UpdateQuery`] variant and the backend decides how to execute it. The SPARQL
//! backend renders the variants with [`ReadQuery::to_sparql`] and
//! [`UpdateQuery::to_sparql`], the in-memory backend interprets them directly.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};

use crate::crawler::task::{TaskOperation, TaskStatus};
use crate::error::StoreError;
use crate::harvest::{ObjectStatus, RemoteDataObject};

/// Document type of pages that are not interesting on their own
pub const GENERIC_PAGE_TYPE: &str = "http://schema.org/WebPage";

/// Creator recorded on remote data objects made by this service
pub const SCRAPER_SERVICE: &str = "http://lblod.data.gift/services/scraper";

const PREFIXES: &str = "PREFIX mu: <http://mu.semte.ch/vocabularies/core/>
PREFIX dct: <http://purl.org/dc/terms/>
PREFIX adms: <http://www.w3.org/ns/adms#>
PREFIX task: <http://redpencil.data.gift/vocabularies/tasks/>
PREFIX nie: <http://www.semanticdesktop.org/ontologies/2007/01/19/nie#>
PREFIX nfo: <http://www.semanticdesktop.org/ontologies/2007/03/22/nfo#>
PREFIX dbpedia: <http://dbpedia.org/ontology/>
PREFIX cogs: <http://vocab.deri.ie/cogs#>
";

/// Metadata of one file resource (virtual or physical)
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    pub uri: String,
    pub uuid: String,
    pub name: String,
    pub format: String,
    pub extension: String,
    pub size: u64,
    pub created: DateTime<Utc>,
}

/// A stored file: the logical file and the physical file backing it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub virtual_file: FileMetadata,
    pub physical_file: FileMetadata,
}

/// Read operations. None of them are retried.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadQuery {
    LoadTask { task: String },
    TaskCollection { task: String },
    FindRemoteDataObject { collection: String, url: String },
    LatestRemoteDataObject { collection: String },
    /// Distinct member URLs, the bound for `MemberUrls` paging
    CountMembers { collection: String, status: ObjectStatus },
    /// Member objects, the bound for `CopyCollectedMembers` batches
    CountMemberObjects { collection: String, status: ObjectStatus },
    AnyMember { collection: String, status: ObjectStatus },
    MemberUrls {
        collection: String,
        status: ObjectStatus,
        limit: usize,
        offset: usize,
    },
    PriorSuccessfulJobs { task: String, since: DateTime<Utc> },
    CountPriorUrls { jobs: Vec<String> },
    PriorUrls {
        jobs: Vec<String>,
        limit: usize,
        offset: usize,
    },
}

/// Update operations. These are retried with backoff by the store gateway,
/// so every variant must be safe to execute more than once.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateQuery {
    InsertRemoteDataObject {
        collection: String,
        object: RemoteDataObject,
    },
    InsertResultsContainer {
        task: String,
        container: String,
        uuid: String,
    },
    CopyCollectedMembers {
        collection: String,
        container: String,
        limit: usize,
        offset: usize,
    },
    InsertPageFile {
        remote_object: String,
        doc_type: String,
        file: StoredFile,
    },
    InsertReportFile { container: String, file: StoredFile },
    UpdateTaskStatus {
        task: String,
        status: TaskStatus,
        modified: DateTime<Utc>,
    },
    /// FAILED for a task still BUSY or SCHEDULED; finished tasks are left alone
    FailActiveTask { task: String, modified: DateTime<Utc> },
    SetTaskError { task: String, message: String },
    ForceStatus {
        operation: TaskOperation,
        from: Vec<TaskStatus>,
        to: TaskStatus,
        modified: DateTime<Utc>,
    },
}

/// Wrap a URI as an IRI reference, percent-encoding characters IRIREF forbids
pub fn escape_uri(uri: &str) -> String {
    let mut escaped = String::with_capacity(uri.len() + 2);
    escaped.push('<');
    for c in uri.chars() {
        match c {
            '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\' | ' ' => {
                escaped.push_str(&format!("%{:02X}", c as u32));
            }
            _ => escaped.push(c),
        }
    }
    escaped.push('>');
    escaped
}

/// Quote a string literal
pub fn escape_string(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\r', "\\r");
    format!("\"{}\"", escaped)
}

pub fn escape_datetime(value: &DateTime<Utc>) -> String {
    format!(
        "\"{}\"^^<http://www.w3.org/2001/XMLSchema#dateTime>",
        value.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

/// Parse an xsd:dateTime value; values without an offset are taken as UTC
pub fn parse_datetime(value: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| StoreError::Decode(format!("invalid datetime: {}", value)))
}

fn values_block(uris: &[String]) -> String {
    uris.iter()
        .map(|uri| escape_uri(uri))
        .collect::<Vec<_>>()
        .join("\n      ")
}

fn prior_files_pattern(jobs: &[String]) -> String {
    format!(
        "VALUES ?job {{
      {jobs}
    }}
    ?task dct:isPartOf ?job ;
          task:operation {collecting} ;
          task:resultsContainer/task:hasFile ?file .
    ?file nie:url ?url ;
          dct:type ?type .
    FILTER (?type != {generic})",
        jobs = values_block(jobs),
        collecting = escape_uri(TaskOperation::Collecting.uri()),
        generic = escape_uri(GENERIC_PAGE_TYPE),
    )
}

fn file_triples(file: &FileMetadata, source: &str) -> String {
    format!(
        "{uri} a nfo:FileDataObject ;
        mu:uuid {uuid} ;
        nfo:fileName {name} ;
        dct:format {format} ;
        nfo:fileSize {size} ;
        dbpedia:fileExtension {extension} ;
        dct:created {created} ;
        dct:modified {created} ;
        nie:dataSource {source} .",
        uri = escape_uri(&file.uri),
        uuid = escape_string(&file.uuid),
        name = escape_string(&file.name),
        format = escape_string(&file.format),
        size = file.size,
        extension = escape_string(&file.extension),
        created = escape_datetime(&file.created),
        source = escape_uri(source),
    )
}

impl ReadQuery {
    /// Short name used in logs and statistics
    pub fn kind(&self) -> &'static str {
        match self {
            ReadQuery::LoadTask { .. } => "load-task",
            ReadQuery::TaskCollection { .. } => "task-collection",
            ReadQuery::FindRemoteDataObject { .. } => "find-remote-data-object",
            ReadQuery::LatestRemoteDataObject { .. } => "latest-remote-data-object",
            ReadQuery::CountMembers { .. } => "count-members",
            ReadQuery::CountMemberObjects { .. } => "count-member-objects",
            ReadQuery::AnyMember { .. } => "any-member",
            ReadQuery::MemberUrls { .. } => "member-urls",
            ReadQuery::PriorSuccessfulJobs { .. } => "prior-successful-jobs",
            ReadQuery::CountPriorUrls { .. } => "count-prior-urls",
            ReadQuery::PriorUrls { .. } => "prior-urls",
        }
    }

    pub fn to_sparql(&self, graph: &str) -> String {
        let graph = escape_uri(graph);
        let body = match self {
            ReadQuery::LoadTask { task } => {
                let task = escape_uri(task);
                format!(
                    "SELECT DISTINCT ?id ?job ?created ?modified ?status ?index ?operation ?error WHERE {{
  GRAPH {graph} {{
    {task} a task:Task ;
        dct:isPartOf ?job ;
        mu:uuid ?id ;
        dct:created ?created ;
        dct:modified ?modified ;
        adms:status ?status ;
        task:index ?index ;
        task:operation ?operation .
    OPTIONAL {{ {task} task:error ?error . }}
  }}
}}"
                )
            }
            ReadQuery::TaskCollection { task } => format!(
                "SELECT ?collection WHERE {{
  GRAPH {graph} {{
    {task} task:inputContainer ?inputContainer .
    ?inputContainer task:hasHarvestingCollection ?collection .
  }}
}}",
                task = escape_uri(task)
            ),
            ReadQuery::FindRemoteDataObject { collection, url } => format!(
                "SELECT DISTINCT ?dataObject ?uuid ?status ?created WHERE {{
  GRAPH {graph} {{
    {collection} dct:hasPart ?dataObject .
    ?dataObject a nfo:RemoteDataObject ;
        mu:uuid ?uuid ;
        nie:url {url} ;
        dct:created ?created .
    OPTIONAL {{ ?dataObject adms:status ?status . }}
  }}
}}",
                collection = escape_uri(collection),
                url = escape_uri(url)
            ),
            ReadQuery::LatestRemoteDataObject { collection } => format!(
                "SELECT ?dataObject ?url ?uuid ?status ?created WHERE {{
  GRAPH {graph} {{
    {collection} dct:hasPart ?dataObject .
    ?dataObject a nfo:RemoteDataObject ;
        mu:uuid ?uuid ;
        nie:url ?url ;
        dct:created ?created .
    OPTIONAL {{ ?dataObject adms:status ?status . }}
  }}
}} ORDER BY DESC(?created) LIMIT 1",
                collection = escape_uri(collection)
            ),
            ReadQuery::CountMembers { collection, status } => format!(
                "SELECT (COUNT(DISTINCT ?url) AS ?count) WHERE {{
  GRAPH {graph} {{
    {collection} dct:hasPart ?rdo .
    ?rdo adms:status {status} ;
         nie:url ?url .
  }}
}}",
                collection = escape_uri(collection),
                status = escape_uri(status.uri())
            ),
            ReadQuery::CountMemberObjects { collection, status } => format!(
                "SELECT (COUNT(DISTINCT ?rdo) AS ?count) WHERE {{
  GRAPH {graph} {{
    {collection} dct:hasPart ?rdo .
    ?rdo adms:status {status} .
  }}
}}",
                collection = escape_uri(collection),
                status = escape_uri(status.uri())
            ),
            ReadQuery::AnyMember { collection, status } => format!(
                "ASK {{
  GRAPH {graph} {{
    {collection} dct:hasPart ?rdo .
    ?rdo adms:status {status} .
  }}
}}",
                collection = escape_uri(collection),
                status = escape_uri(status.uri())
            ),
            ReadQuery::MemberUrls {
                collection,
                status,
                limit,
                offset,
            } => format!(
                "SELECT ?url WHERE {{
  SELECT DISTINCT ?url WHERE {{
    GRAPH {graph} {{
      {collection} dct:hasPart ?rdo .
      ?rdo adms:status {status} ;
           nie:url ?url .
    }}
  }} ORDER BY ?url
}} LIMIT {limit} OFFSET {offset}",
                collection = escape_uri(collection),
                status = escape_uri(status.uri())
            ),
            ReadQuery::PriorSuccessfulJobs { task, since } => format!(
                "SELECT DISTINCT ?olderJob WHERE {{
  GRAPH {graph} {{
    {task} dct:isPartOf ?job .
    ?job dct:creator ?scheduledJob .
    ?scheduledJob a cogs:ScheduledJob .
    ?olderJob dct:creator ?scheduledJob ;
              dct:modified ?modified ;
              adms:status {success} .
    FILTER (?olderJob != ?job && ?modified > {since})
  }}
}} ORDER BY ?olderJob",
                task = escape_uri(task),
                success = escape_uri(&TaskStatus::Success.uri()),
                since = escape_datetime(since)
            ),
            ReadQuery::CountPriorUrls { jobs } => format!(
                "SELECT (COUNT(DISTINCT ?url) AS ?count) WHERE {{
  GRAPH {graph} {{
    {pattern}
  }}
}}",
                pattern = prior_files_pattern(jobs)
            ),
            ReadQuery::PriorUrls {
                jobs,
                limit,
                offset,
            } => format!(
                "SELECT ?url WHERE {{
  SELECT DISTINCT ?url WHERE {{
    GRAPH {graph} {{
    {pattern}
    }}
  }} ORDER BY ?url
}} LIMIT {limit} OFFSET {offset}",
                pattern = prior_files_pattern(jobs)
            ),
        };
        format!("{}\n{}", PREFIXES, body)
    }
}

impl UpdateQuery {
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateQuery::InsertRemoteDataObject { .. } => "insert-remote-data-object",
            UpdateQuery::InsertResultsContainer { .. } => "insert-results-container",
            UpdateQuery::CopyCollectedMembers { .. } => "copy-collected-members",
            UpdateQuery::InsertPageFile { .. } => "insert-page-file",
            UpdateQuery::InsertReportFile { .. } => "insert-report-file",
            UpdateQuery::UpdateTaskStatus { .. } => "update-task-status",
            UpdateQuery::FailActiveTask { .. } => "fail-active-task",
            UpdateQuery::SetTaskError { .. } => "set-task-error",
            UpdateQuery::ForceStatus { .. } => "force-status",
        }
    }

    pub fn to_sparql(&self, graph: &str) -> String {
        let graph = escape_uri(graph);
        let body = match self {
            UpdateQuery::InsertRemoteDataObject { collection, object } => format!(
                "INSERT DATA {{
  GRAPH {graph} {{
    {collection} dct:hasPart {uri} .
    {uri} a nfo:RemoteDataObject ;
        mu:uuid {uuid} ;
        nie:url {url} ;
        dct:created {created} ;
        dct:creator {creator} ;
        dct:modified {created} ;
        adms:status {status} .
  }}
}}",
                collection = escape_uri(collection),
                uri = escape_uri(&object.uri),
                uuid = escape_string(&object.id),
                url = escape_uri(&object.url),
                created = escape_datetime(&object.created),
                creator = escape_uri(SCRAPER_SERVICE),
                status = escape_uri(ObjectStatus::Ready.uri())
            ),
            UpdateQuery::InsertResultsContainer {
                task,
                container,
                uuid,
            } => format!(
                "INSERT DATA {{
  GRAPH {graph} {{
    {task} task:resultsContainer {container} .
    {container} a nfo:DataContainer ;
        mu:uuid {uuid} .
  }}
}}",
                task = escape_uri(task),
                container = escape_uri(container),
                uuid = escape_string(uuid)
            ),
            UpdateQuery::CopyCollectedMembers {
                collection,
                container,
                limit,
                offset,
            } => format!(
                "INSERT {{
  GRAPH {graph} {{ {container} task:hasFile ?rdo . }}
}}
WHERE {{
  SELECT ?rdo WHERE {{
    GRAPH {graph} {{
      {collection} dct:hasPart ?rdo .
      ?rdo adms:status {collected} .
    }}
  }} ORDER BY ?rdo LIMIT {limit} OFFSET {offset}
}}",
                container = escape_uri(container),
                collection = escape_uri(collection),
                collected = escape_uri(ObjectStatus::Collected.uri())
            ),
            UpdateQuery::InsertPageFile {
                remote_object,
                doc_type,
                file,
            } => {
                let rdo = escape_uri(remote_object);
                format!(
                    "DELETE {{
  GRAPH {graph} {{
    {rdo} adms:status ?status .
    {rdo} dct:modified ?modified .
  }}
}}
INSERT {{
  GRAPH {graph} {{
    {rdo} adms:status {collected} ;
        dct:modified {now} ;
        dct:type {doc_type} .
    {virtual_file}
    {physical_file}
  }}
}}
WHERE {{
  GRAPH {graph} {{
    {rdo} adms:status ?status .
    OPTIONAL {{ {rdo} dct:modified ?modified . }}
  }}
}}",
                    collected = escape_uri(ObjectStatus::Collected.uri()),
                    now = escape_datetime(&file.virtual_file.created),
                    doc_type = escape_uri(doc_type),
                    virtual_file = file_triples(&file.virtual_file, remote_object),
                    physical_file = file_triples(&file.physical_file, &file.virtual_file.uri)
                )
            }
            UpdateQuery::InsertReportFile { container, file } => format!(
                "INSERT DATA {{
  GRAPH {graph} {{
    {container} task:hasFile {file_uri} .
    {file_uri} a nfo:FileDataObject ;
        mu:uuid {uuid} ;
        nfo:fileName {name} ;
        dct:format {format} ;
        nfo:fileSize {size} ;
        dbpedia:fileExtension {extension} ;
        dct:created {created} ;
        dct:modified {created} .
    {physical_file}
  }}
}}",
                container = escape_uri(container),
                file_uri = escape_uri(&file.virtual_file.uri),
                uuid = escape_string(&file.virtual_file.uuid),
                name = escape_string(&file.virtual_file.name),
                format = escape_string(&file.virtual_file.format),
                size = file.virtual_file.size,
                extension = escape_string(&file.virtual_file.extension),
                created = escape_datetime(&file.virtual_file.created),
                physical_file = file_triples(&file.physical_file, &file.virtual_file.uri)
            ),
            UpdateQuery::UpdateTaskStatus {
                task,
                status,
                modified,
            } => {
                let task = escape_uri(task);
                format!(
                    "DELETE {{
  GRAPH {graph} {{
    {task} adms:status ?status .
    {task} dct:modified ?modified .
  }}
}}
INSERT {{
  GRAPH {graph} {{
    {task} adms:status {status} ;
        dct:modified {modified} .
  }}
}}
WHERE {{
  GRAPH {graph} {{
    {task} a task:Task ;
        adms:status ?status .
    OPTIONAL {{ {task} dct:modified ?modified . }}
  }}
}}",
                    status = escape_uri(&status.uri()),
                    modified = escape_datetime(modified)
                )
            }
            UpdateQuery::FailActiveTask { task, modified } => {
                let task = escape_uri(task);
                format!(
                    "DELETE {{
  GRAPH {graph} {{
    {task} adms:status ?status .
    {task} dct:modified ?modified .
  }}
}}
INSERT {{
  GRAPH {graph} {{
    {task} adms:status {failed} ;
        dct:modified {now} .
  }}
}}
WHERE {{
  GRAPH {graph} {{
    {task} a task:Task ;
        adms:status ?status .
    VALUES ?status {{
      {active}
    }}
    OPTIONAL {{ {task} dct:modified ?modified . }}
  }}
}}",
                    failed = escape_uri(&TaskStatus::Failed.uri()),
                    now = escape_datetime(modified),
                    active = values_block(&[TaskStatus::Busy.uri(), TaskStatus::Scheduled.uri()])
                )
            }
            UpdateQuery::SetTaskError { task, message } => {
                let task = escape_uri(task);
                format!(
                    "DELETE {{
  GRAPH {graph} {{ {task} task:error ?error . }}
}}
INSERT {{
  GRAPH {graph} {{ {task} task:error {message} . }}
}}
WHERE {{
  GRAPH {graph} {{
    {task} a task:Task .
    OPTIONAL {{ {task} task:error ?error . }}
  }}
}}",
                    message = escape_string(message)
                )
            }
            UpdateQuery::ForceStatus {
                operation,
                from,
                to,
                modified,
            } => format!(
                "DELETE {{
  GRAPH {graph} {{
    ?task adms:status ?status .
    ?task dct:modified ?modified .
  }}
}}
INSERT {{
  GRAPH {graph} {{
    ?task adms:status {to} ;
        dct:modified {now} .
  }}
}}
WHERE {{
  GRAPH {graph} {{
    ?task a task:Task ;
        dct:isPartOf ?job ;
        task:operation {operation} ;
        adms:status ?status .
    VALUES ?status {{
      {from}
    }}
    OPTIONAL {{ ?task dct:modified ?modified . }}
  }}
}}",
                to = escape_uri(&to.uri()),
                now = escape_datetime(modified),
                operation = escape_uri(operation.uri()),
                from = values_block(&from.iter().map(|s| s.uri()).collect::<Vec<_>>())
            ),
        };
        format!("{}\n{}", PREFIXES, body)
    }
}
