// Catalog probes. Each takes the subject name as its only parameter (@P1).

pub(crate) const DATABASE_EXISTS_QUERY: &str =
    "SELECT name FROM sys.databases WHERE name = @P1;";

// Contained users created WITH PASSWORD are type 'S', same as login-mapped
// SQL users, so both the current and the legacy layout are found.
pub(crate) const USER_EXISTS_QUERY: &str =
    "SELECT name FROM sys.database_principals WHERE name = @P1 AND type = 'S';";

pub(crate) const OWNED_OBJECTS_QUERY: &str = r#"
SELECT N'SCHEMA' AS kind, CAST(NULL AS sysname) AS schema_name, s.name AS object_name
FROM sys.schemas AS s
WHERE s.principal_id = USER_ID(@P1)
UNION ALL
SELECT N'OBJECT', SCHEMA_NAME(o.schema_id), o.name
FROM sys.objects AS o
WHERE o.principal_id = USER_ID(@P1)
  AND o.parent_object_id = 0
UNION ALL
SELECT N'ROLE', CAST(NULL AS sysname), r.name
FROM sys.database_principals AS r
WHERE r.type = 'R'
  AND r.owning_principal_id = USER_ID(@P1)
ORDER BY kind, schema_name, object_name;
"#;
