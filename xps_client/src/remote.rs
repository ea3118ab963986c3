//! # Remote file store
//!
//! Access to the controller's filesystem, where `system.ini`, trajectory
//! files and TCL scripts live. Generations C and Q serve plain FTP;
//! generation D serves SFTP. Each operation opens a fresh connection, does
//! its work and closes, matching how the controllers expect to be used.
//!
//! Files are latin-1 text on the controller side and are transcoded on both
//! paths.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use ssh2::Session;
use std::io::{Cursor, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use suppaftp::FtpStream;
use thiserror::Error;
use xps_if::proto::{decode_latin1, encode_latin1};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Controller directory holding `system.ini` and `stages.ini`.
pub const CONFIG_DIR: &str = "Config";

/// Controller directory holding trajectory files.
pub const TRAJECTORY_DIR: &str = "Public/Trajectories";

/// Controller directory holding TCL scripts.
pub const SCRIPT_DIR: &str = "Public/Scripts";

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("FTP error: {0}")]
    Ftp(#[from] suppaftp::FtpError),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// File operations against the controller's filesystem.
///
/// `dir` is one of the controller directories relative to the generation's
/// remote root ([`CONFIG_DIR`], [`TRAJECTORY_DIR`], [`SCRIPT_DIR`]).
pub trait RemoteStore {
    /// List the file names in a directory.
    fn list(&mut self, dir: &str) -> Result<Vec<String>, RemoteError>;

    /// Read a remote text file.
    fn get_text(&mut self, dir: &str, name: &str) -> Result<String, RemoteError>;

    /// Write a remote text file, replacing it if present.
    fn put_text(&mut self, dir: &str, name: &str, text: &str) -> Result<(), RemoteError>;

    /// Delete a remote file.
    fn delete(&mut self, dir: &str, name: &str) -> Result<(), RemoteError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Plain FTP store, used by XPS-C and XPS-Q controllers.
pub struct FtpStore {
    host: String,
    username: String,
    password: String,

    /// Remote filesystem root, `/Admin` on XPS-C
    root: String,
}

/// SFTP store, used by XPS-D controllers.
pub struct SftpStore {
    host: String,
    username: String,
    password: String,
    root: String,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FtpStore {
    pub fn new(host: &str, username: &str, password: &str, root: &str) -> Self {
        Self {
            host: host.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            root: root.to_string(),
        }
    }

    fn open(&self, dir: &str) -> Result<FtpStream, RemoteError> {
        let mut ftp = FtpStream::connect(format!("{}:21", self.host))?;
        ftp.login(&self.username, &self.password)?;
        ftp.cwd(&join_remote(&self.root, dir))?;
        Ok(ftp)
    }
}

impl RemoteStore for FtpStore {
    fn list(&mut self, dir: &str) -> Result<Vec<String>, RemoteError> {
        let mut ftp = self.open(dir)?;
        let names = ftp.nlst(None)?;
        ftp.quit()?;
        Ok(names)
    }

    fn get_text(&mut self, dir: &str, name: &str) -> Result<String, RemoteError> {
        let mut ftp = self.open(dir)?;
        let buffer = ftp.retr_as_buffer(name)?;
        ftp.quit()?;
        Ok(decode_latin1(buffer.get_ref()))
    }

    fn put_text(&mut self, dir: &str, name: &str, text: &str) -> Result<(), RemoteError> {
        let mut ftp = self.open(dir)?;
        let mut reader = Cursor::new(encode_latin1(&clean_text(text)));
        ftp.put_file(name, &mut reader)?;
        ftp.quit()?;
        debug!("Uploaded {}/{} over FTP", dir, name);
        Ok(())
    }

    fn delete(&mut self, dir: &str, name: &str) -> Result<(), RemoteError> {
        let mut ftp = self.open(dir)?;
        ftp.rm(name)?;
        ftp.quit()?;
        Ok(())
    }
}

impl SftpStore {
    pub fn new(host: &str, username: &str, password: &str, root: &str) -> Self {
        Self {
            host: host.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            root: root.to_string(),
        }
    }

    fn open(&self) -> Result<(Session, ssh2::Sftp), RemoteError> {
        let tcp = TcpStream::connect(format!("{}:22", self.host))?;
        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;
        session.userauth_password(&self.username, &self.password)?;
        let sftp = session.sftp()?;
        Ok((session, sftp))
    }

    fn remote_path(&self, dir: &str, name: &str) -> PathBuf {
        PathBuf::from(join_remote(&join_remote(&self.root, dir), name))
    }
}

impl RemoteStore for SftpStore {
    fn list(&mut self, dir: &str) -> Result<Vec<String>, RemoteError> {
        let (_session, sftp) = self.open()?;
        let entries = sftp.readdir(&PathBuf::from(join_remote(&self.root, dir)))?;
        Ok(entries
            .iter()
            .filter_map(|(path, _)| path.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect())
    }

    fn get_text(&mut self, dir: &str, name: &str) -> Result<String, RemoteError> {
        let (_session, sftp) = self.open()?;
        let mut file = sftp.open(&self.remote_path(dir, name))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(decode_latin1(&bytes))
    }

    fn put_text(&mut self, dir: &str, name: &str, text: &str) -> Result<(), RemoteError> {
        let (_session, sftp) = self.open()?;
        let mut file = sftp.create(&self.remote_path(dir, name))?;
        file.write_all(&encode_latin1(&clean_text(text)))?;
        debug!("Uploaded {}/{} over SFTP", dir, name);
        Ok(())
    }

    fn delete(&mut self, dir: &str, name: &str) -> Result<(), RemoteError> {
        let (_session, sftp) = self.open()?;
        sftp.unlink(&self.remote_path(dir, name))?;
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Join remote path components with forward slashes, skipping empty parts.
fn join_remote(base: &str, rest: &str) -> String {
    if base.is_empty() {
        rest.to_string()
    } else if rest.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), rest)
    }
}

/// Normalise text for upload: the controllers expect unix line endings.
fn clean_text(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("/Admin", "Config"), "/Admin/Config");
        assert_eq!(join_remote("", "Public/Trajectories"), "Public/Trajectories");
        assert_eq!(join_remote("/Admin/", "Config"), "/Admin/Config");
        assert_eq!(join_remote("/Admin", ""), "/Admin");
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("a\r\nb\rc\n"), "a\nb\nc\n");
    }
}
