use crate::error::CatalogError;

pub fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<(), CatalogError> {
    let len = value.len();
    if len < min || len > max {
        return Err(CatalogError::InvalidParams(format!(
            "{field} must be between {min} and {max} characters (got {len})"
        )));
    }
    Ok(())
}

/// Module names come from the repository manifest and become part of image
/// names and lookup keys, so the character set is kept tight.
pub fn check_module_name(value: &str) -> Result<(), CatalogError> {
    check_length("module_name", value, 1, 100)?;
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CatalogError::InvalidParams(
            "module_name must contain only ASCII alphanumerics, hyphens, or underscores".into(),
        ));
    }
    Ok(())
}

pub fn check_git_url(value: &str) -> Result<(), CatalogError> {
    check_length("git_url", value, 1, 2048)?;
    let parsed = url::Url::parse(value)
        .map_err(|_| CatalogError::InvalidParams("git_url is not a valid URL".into()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(CatalogError::InvalidParams(
            "git_url must use http or https scheme".into(),
        ));
    }
    if parsed.host_str().is_none() {
        return Err(CatalogError::InvalidParams("git_url must have a host".into()));
    }
    Ok(())
}

pub fn check_username(value: &str) -> Result<(), CatalogError> {
    check_length("username", value, 1, 100)?;
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(CatalogError::InvalidParams(
            "username must contain only ASCII alphanumerics, hyphens, underscores, or dots".into(),
        ));
    }
    Ok(())
}
