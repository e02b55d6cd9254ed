use snafu::Snafu;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(super)))]
pub enum Error {
    #[snafu(display("git was not found on the search path: {source}"))]
    NotFound { source: which::Error },

    #[snafu(display("failed to run git {}: {source}", args.join(" ")))]
    CommandFailed {
        args: Vec<String>,
        source: std::io::Error,
    },

    #[snafu(display("git {} failed: {message}", args.join(" ")))]
    OperationFailed { message: String, args: Vec<String> },

    #[snafu(display("git output was not valid UTF-8: {source}"))]
    NotUtf8 { source: std::string::FromUtf8Error },

    #[snafu(display("could not resolve ref '{git_ref}' against remote '{url}'"))]
    RefNotFound { url: String, git_ref: String },
}
