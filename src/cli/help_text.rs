pub(super) const ROOT_LONG_ABOUT: &str = "\
Seal a directory tree and detect drift and silent corruption

Treeseal records size, timestamps and a SHA-256 checksum of every file below a
directory in a single database, .treeseal/base.sqlite3, next to a signature
file that protects the database itself. Later runs compare the tree on disk
against that record.

STATUSES:

  .  unchanged
  +  new on disk
  -  missing from disk
  W  warning: size or timestamps changed, the file was probably edited
  E  error: content changed although size and timestamps did not (corruption)

TYPICAL WORKFLOW:

  1. Seal a directory tree:
     $ cd /path/to/archive
     $ treeseal init

     Or without changing directory:
     $ treeseal -C /path/to/archive init

  2. Later, check what changed:
     $ treeseal status

  3. Record legitimate changes:
     $ treeseal accept --fingerprint <FINGERPRINT>

  4. Periodically verify integrity:
     $ treeseal verify

  5. Find where some content lives (or lived):
     $ treeseal find <SHA256>

CONFIGURATION:

  .treeseal/preferences.toml is written on init and controls which entries
  are looked at:

    [metadata]
    version = 1

    [filter]
    includes = []             # file name globs; empty means all files
    excludes = [\"Thumbs.db\"]  # \"name\", \"dir/\" or \"/path/from/root\"

GLOBAL OPTIONS:

  -C <DIRECTORY>
    Change to directory before operating (like git -C or make -C).

  -v, -vv
    Log progress (info) or every decision (debug) to stderr. Both take
    precedence over RUST_LOG, which applies otherwise (default: warn).

EXIT CODES:

  0    success, no changes
  1    changes detected (status, verify)
  255  error

For detailed help on any command, use:
  treeseal <command> --help
";

pub(super) const INIT_LONG_ABOUT: &str = "\
Record the current state of the directory tree

Hashes every file below the current directory (honouring the filter in
.treeseal/preferences.toml) and stores the result in .treeseal/base.sqlite3.
Default preferences are written first if there are none.

Fails if the directory is already sealed, unless --force is given, in which
case the old record is discarded.

EXAMPLES:

  $ treeseal init
  $ treeseal -C /data/photos init --force
";

pub(super) const STATUS_LONG_ABOUT: &str = "\
Show files that changed since they were sealed

Hashes every file and compares it with the stored record. Each changed file
is printed with its status code; directories are only printed when they are
new or missing and empty.

A file whose size or timestamps changed is a warning (W): it was most likely
edited. A file whose content changed while size and timestamps did not is an
error (E): this is what silent corruption looks like.

If anything changed, a fingerprint of the changes is printed. Pass it to
'treeseal accept --fingerprint' to record exactly what you reviewed.

OPTIONS:

  --all    also list unchanged files
  --diff   show was/now details (size, mtime, checksum) for changed files

Exits with 1 if there are changes.
";

pub(super) const VERIFY_LONG_ABOUT: &str = "\
Check the tree against the store, exit with success if nothing changed

Same comparison as status, meant for scripts and monitoring: changed entries
are printed, the result is logged, and the exit code tells whether the tree
still matches its record.

EXAMPLES:

  $ treeseal -C /data verify || echo 'Integrity check failed!'
";

pub(super) const ACCEPT_LONG_ABOUT: &str = "\
Record changes in the store

Compares the tree with the store, then writes the current state of every
changed entry (or only of the given paths) to the store: new entries are
added with their contents, missing ones are forgotten, changed files are
re-recorded.

A path may name a file or a directory, relative to the root. Accepting an
entry inside a directory that is itself new requires accepting the directory.

FINGERPRINT VALIDATION (--fingerprint):

  1. Run 'treeseal status' to review changes and get a fingerprint
  2. Run 'treeseal accept --fingerprint <FINGERPRINT>'

If anything changed in between, the fingerprint won't match and nothing is
written.
";

pub(super) const FIND_LONG_ABOUT: &str = "\
List stored files with the given SHA-256 checksum

Looks the checksum up in the store and prints the relative path of every
file recorded with it. Useful to find out whether lost content still exists
somewhere else in the tree.
";
